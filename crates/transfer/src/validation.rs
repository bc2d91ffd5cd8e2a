//! Request validation performed before any network call.

use std::collections::HashMap;

use stowage_common::{MAX_METADATA_BYTES, MAX_METADATA_ENTRIES, MAX_OBJECT_NAME_BYTES};

use crate::error::EmergeError;

/// Check an object name against the service's naming rules: non-empty,
/// at most 1024 bytes of UTF-8, no leading slash, no control characters.
pub fn validate_object_name(name: &str) -> Result<(), EmergeError> {
    if name.is_empty() {
        return Err(EmergeError::validation("object name must not be empty"));
    }
    if name.len() > MAX_OBJECT_NAME_BYTES {
        return Err(EmergeError::validation(format!(
            "object name is {} bytes, limit is {}",
            name.len(),
            MAX_OBJECT_NAME_BYTES
        )));
    }
    if name.starts_with('/') {
        return Err(EmergeError::validation(format!(
            "object name must not start with '/': {name:?}"
        )));
    }
    if let Some(bad) = name.chars().find(|c| c.is_control()) {
        return Err(EmergeError::validation(format!(
            "object name contains control character {:?}",
            bad
        )));
    }
    Ok(())
}

/// Check user metadata against the service's header budget.
pub fn validate_metadata(metadata: &HashMap<String, String>) -> Result<(), EmergeError> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(EmergeError::validation(format!(
            "{} metadata entries, limit is {}",
            metadata.len(),
            MAX_METADATA_ENTRIES
        )));
    }
    let total_bytes: usize = metadata.iter().map(|(k, v)| k.len() + v.len()).sum();
    if total_bytes > MAX_METADATA_BYTES {
        return Err(EmergeError::validation(format!(
            "metadata totals {} bytes, limit is {}",
            total_bytes, MAX_METADATA_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names_pass() {
        validate_object_name("photos/2024/cat.jpg").unwrap();
        validate_object_name("a").unwrap();
        validate_object_name("name with spaces and ünïcode").unwrap();
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(validate_object_name("").is_err());
    }

    #[test]
    fn test_overlong_name_rejected() {
        let name: String = "x".repeat(MAX_OBJECT_NAME_BYTES + 1);
        assert!(validate_object_name(&name).is_err());
    }

    #[test]
    fn test_leading_slash_rejected() {
        assert!(validate_object_name("/absolute/path").is_err());
    }

    #[test]
    fn test_control_characters_rejected() {
        assert!(validate_object_name("line\nbreak").is_err());
        assert!(validate_object_name("del\u{7f}ete").is_err());
    }

    #[test]
    fn test_metadata_limits() {
        let mut metadata: HashMap<String, String> = HashMap::new();
        metadata.insert("purpose".to_string(), "backup".to_string());
        validate_metadata(&metadata).unwrap();

        for i in 0..MAX_METADATA_ENTRIES {
            metadata.insert(format!("key-{i}"), "v".to_string());
        }
        assert!(validate_metadata(&metadata).is_err());

        let mut oversized: HashMap<String, String> = HashMap::new();
        oversized.insert("note".to_string(), "v".repeat(MAX_METADATA_BYTES));
        assert!(validate_metadata(&oversized).is_err());
    }
}
