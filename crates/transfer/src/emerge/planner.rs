//! Emerge planning: from write intents to a transport-legal plan.
//!
//! Planning is pure: no I/O, no digests, no network. The planner decides
//! only which bytes form which parts, and leaves digest computation to
//! the part definitions and execution to the executor.

use std::sync::Arc;

use tracing::debug;

use crate::emerge::part_definition::{
    CopyPartDefinition, EmergePartDefinition, UploadPartDefinition, UploadSubpart,
    UploadSubpartsDefinition,
};
use crate::emerge::write_intent::{validate_intents, OutboundSource, WriteIntent};
use crate::error::EmergeError;
use crate::source::{CopySource, UploadSource};
use crate::types::ServiceLimits;

/// An immutable, ordered description of how an object will be created.
#[derive(Debug, Clone)]
pub enum EmergePlan {
    /// One direct whole-object upload; no large-file machinery.
    SmallObject {
        definition: EmergePartDefinition,
        length: u64,
    },
    /// An ordered sequence of parts, numbered 1..=N.
    LargeObject {
        parts: Vec<EmergePartDefinition>,
        total_length: u64,
    },
}

impl EmergePlan {
    /// Total byte length of the finished object.
    pub fn total_length(&self) -> u64 {
        match self {
            EmergePlan::SmallObject { length, .. } => *length,
            EmergePlan::LargeObject { total_length, .. } => *total_length,
        }
    }

    /// Number of physical transfers the plan requires.
    pub fn part_count(&self) -> usize {
        match self {
            EmergePlan::SmallObject { .. } => 1,
            EmergePlan::LargeObject { parts, .. } => parts.len(),
        }
    }

    /// Whether the plan uses the large-file protocol.
    pub fn is_large(&self) -> bool {
        matches!(self, EmergePlan::LargeObject { .. })
    }
}

/// Pure function from write intents and size constraints to a plan.
#[derive(Debug, Clone)]
pub struct EmergePlanner {
    min_part_size: u64,
    max_part_size: u64,
    max_part_count: u32,
    recommended_part_size: Option<u64>,
}

impl EmergePlanner {
    /// Create a planner for the given service limits.
    ///
    /// A caller recommendation below the service minimum is ignored; one
    /// above the maximum part size is clamped to it.
    pub fn new(limits: &ServiceLimits, recommended_part_size: Option<u64>) -> Self {
        Self {
            min_part_size: limits.min_part_size,
            max_part_size: limits.max_part_size,
            max_part_count: limits.max_part_count,
            recommended_part_size,
        }
    }

    /// Plan a materialized intent sequence.
    pub fn plan(&self, intents: &[WriteIntent]) -> Result<EmergePlan, EmergeError> {
        let total: u64 = validate_intents(intents)?;
        self.plan_validated(intents, total)
    }

    /// Plan a lazily produced intent sequence, validating contiguity as
    /// it is consumed.
    pub fn plan_from_iter(
        &self,
        intents: impl IntoIterator<Item = WriteIntent>,
    ) -> Result<EmergePlan, EmergeError> {
        let mut collected: Vec<WriteIntent> = Vec::new();
        let mut expected_offset: u64 = 0;
        for intent in intents {
            if intent.length() == 0 {
                return Err(EmergeError::validation(format!(
                    "zero-length write intent from {}",
                    intent.source().source_id()
                )));
            }
            if intent.destination_offset() != expected_offset {
                return Err(EmergeError::validation(format!(
                    "write intent from {} starts at {} but byte {} is next (gap or overlap)",
                    intent.source().source_id(),
                    intent.destination_offset(),
                    expected_offset
                )));
            }
            expected_offset = intent.destination_end();
            collected.push(intent);
        }
        if collected.is_empty() {
            return Err(EmergeError::validation("at least one write intent required"));
        }
        self.plan_validated(&collected, expected_offset)
    }

    fn plan_validated(&self, intents: &[WriteIntent], total: u64) -> Result<EmergePlan, EmergeError> {
        let part_size: u64 = self.target_part_size(total)?;
        let all_upload: bool = intents.iter().all(|i| !i.is_copy());

        if all_upload && total < part_size {
            debug!(total, "planned whole-object upload");
            return Ok(EmergePlan::SmallObject {
                definition: Self::whole_object_definition(intents),
                length: total,
            });
        }

        let mut accumulator = PartAccumulator::new(part_size, self.min_part_size);
        for intent in intents {
            match intent.source() {
                OutboundSource::Upload(source) => {
                    accumulator.push_upload(source.clone(), intent.length());
                }
                OutboundSource::Copy(source) => {
                    accumulator.push_copy(source.clone(), intent.length(), self.max_part_size);
                }
            }
        }
        let parts: Vec<EmergePartDefinition> = accumulator.finish();

        if parts.len() > self.max_part_count as usize {
            return Err(EmergeError::Capacity {
                message: format!(
                    "plan needs {} parts but the service allows {}",
                    parts.len(),
                    self.max_part_count
                ),
            });
        }

        debug!(
            total,
            part_size,
            part_count = parts.len(),
            "planned large-object upload"
        );
        Ok(EmergePlan::LargeObject {
            parts,
            total_length: total,
        })
    }

    /// Target size for upload parts: the caller's recommendation when
    /// valid, else the service minimum, raised until the plan fits the
    /// part-count ceiling.
    fn target_part_size(&self, total: u64) -> Result<u64, EmergeError> {
        let base: u64 = match self.recommended_part_size {
            Some(recommended) if recommended >= self.min_part_size => {
                recommended.min(self.max_part_size)
            }
            _ => self.min_part_size,
        };
        let needed_for_count: u64 = total.div_ceil(self.max_part_count as u64);
        let part_size: u64 = base.max(needed_for_count);
        if part_size > self.max_part_size {
            return Err(EmergeError::Capacity {
                message: format!(
                    "{} bytes cannot fit in {} parts of at most {} bytes",
                    total, self.max_part_count, self.max_part_size
                ),
            });
        }
        Ok(part_size)
    }

    fn whole_object_definition(intents: &[WriteIntent]) -> EmergePartDefinition {
        let upload_source = |intent: &WriteIntent| -> Arc<dyn UploadSource> {
            match intent.source() {
                OutboundSource::Upload(source) => source.clone(),
                OutboundSource::Copy(_) => unreachable!("small objects contain no copy sources"),
            }
        };
        if intents.len() == 1 {
            let source = upload_source(&intents[0]);
            let length: u64 = source.content_length();
            EmergePartDefinition::Upload(UploadPartDefinition::new(source, 0, length))
        } else {
            let subparts: Vec<UploadSubpart> = intents
                .iter()
                .map(|intent| {
                    let source = upload_source(intent);
                    let length: u64 = source.content_length();
                    UploadSubpart::Local {
                        source,
                        relative_offset: 0,
                        length,
                    }
                })
                .collect();
            EmergePartDefinition::UploadSubparts(UploadSubpartsDefinition::new(subparts))
        }
    }
}

/// Walks intents in destination order, packing upload bytes into parts of
/// the target size and emitting copy parts for large enough copy ranges.
struct PartAccumulator {
    target_part_size: u64,
    min_part_size: u64,
    parts: Vec<EmergePartDefinition>,
    buffer: Vec<UploadSubpart>,
    buffer_len: u64,
}

impl PartAccumulator {
    fn new(target_part_size: u64, min_part_size: u64) -> Self {
        Self {
            target_part_size,
            min_part_size,
            parts: Vec::new(),
            buffer: Vec::new(),
            buffer_len: 0,
        }
    }

    /// Accrue an upload source into the buffer, splitting it across part
    /// boundaries as the buffer fills.
    fn push_upload(&mut self, source: Arc<dyn UploadSource>, length: u64) {
        self.push_fragments(length, |relative_offset, length| UploadSubpart::Local {
            source: source.clone(),
            relative_offset,
            length,
        });
    }

    /// Handle a copy intent. Ranges below the minimum part size cannot
    /// stand as copy parts, so they join the upload buffer and are
    /// streamed through a ranged read at execution time. Larger ranges
    /// become dedicated copy parts; their head may first be diverted into
    /// an undersized buffer to bring it up to the minimum.
    fn push_copy(&mut self, source: Arc<CopySource>, length: u64, max_part_size: u64) {
        let mut relative_offset: u64 = 0;
        let mut remaining: u64 = length;

        if remaining < self.min_part_size {
            self.push_remote(source, relative_offset, remaining);
            return;
        }

        if self.buffer_len > 0 && self.buffer_len < self.min_part_size {
            let take: u64 = self.min_part_size - self.buffer_len;
            self.push_remote(source.clone(), relative_offset, take);
            relative_offset += take;
            remaining -= take;
        }
        self.flush_buffer();

        if remaining == 0 {
            return;
        }
        if remaining < self.min_part_size {
            // the top-up ate the range down below the minimum
            self.push_remote(source, relative_offset, remaining);
            return;
        }

        for part_length in equalized_copy_lengths(remaining, max_part_size) {
            self.parts.push(EmergePartDefinition::Copy(CopyPartDefinition::new(
                source.clone(),
                relative_offset,
                part_length,
            )));
            relative_offset += part_length;
        }
    }

    fn push_remote(&mut self, source: Arc<CopySource>, base_offset: u64, length: u64) {
        self.push_fragments(length, |relative_offset, length| UploadSubpart::Remote {
            source: source.clone(),
            relative_offset: base_offset + relative_offset,
            length,
        });
    }

    fn push_fragments<F>(&mut self, length: u64, make: F)
    where
        F: Fn(u64, u64) -> UploadSubpart,
    {
        let mut offset: u64 = 0;
        let mut remaining: u64 = length;
        while remaining > 0 {
            let room: u64 = self.target_part_size - self.buffer_len;
            let take: u64 = room.min(remaining);
            self.buffer.push(make(offset, take));
            self.buffer_len += take;
            offset += take;
            remaining -= take;
            if self.buffer_len == self.target_part_size {
                self.flush_buffer();
            }
        }
    }

    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let fragments: Vec<UploadSubpart> = std::mem::take(&mut self.buffer);
        self.buffer_len = 0;

        let part: EmergePartDefinition = if fragments.len() == 1 {
            match fragments.into_iter().next().expect("one fragment") {
                UploadSubpart::Local {
                    source,
                    relative_offset,
                    length,
                } => EmergePartDefinition::Upload(UploadPartDefinition::new(
                    source,
                    relative_offset,
                    length,
                )),
                remote @ UploadSubpart::Remote { .. } => EmergePartDefinition::UploadSubparts(
                    UploadSubpartsDefinition::new(vec![remote]),
                ),
            }
        } else {
            EmergePartDefinition::UploadSubparts(UploadSubpartsDefinition::new(fragments))
        };
        self.parts.push(part);
    }

    fn finish(mut self) -> Vec<EmergePartDefinition> {
        // the tail part may legitimately be below the minimum
        self.flush_buffer();
        self.parts
    }
}

/// Cut a copy range against the maximum part size, equalizing the pieces
/// so no piece ends up disproportionately small.
fn equalized_copy_lengths(length: u64, max_part_size: u64) -> Vec<u64> {
    let part_count: u64 = length.div_ceil(max_part_size);
    if part_count <= 1 {
        return vec![length];
    }
    let base: u64 = length / part_count;
    let remainder: u64 = length % part_count;
    (0..part_count)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::UploadSourceBytes;

    const MB: u64 = 1024 * 1024;

    fn limits(min: u64, max: u64, count: u32) -> ServiceLimits {
        ServiceLimits {
            min_part_size: min,
            max_part_size: max,
            max_part_count: count,
        }
    }

    fn upload_intents(sizes: &[usize]) -> Vec<WriteIntent> {
        WriteIntent::wrap_sources(sizes.iter().map(|&len| {
            OutboundSource::Upload(Arc::new(UploadSourceBytes::new(vec![7u8; len])))
        }))
    }

    fn copy_intent(length: u64) -> Vec<WriteIntent> {
        WriteIntent::wrap_sources([OutboundSource::Copy(Arc::new(CopySource::new(
            "stored-x", 0, length,
        )))])
    }

    fn plan_lengths(plan: &EmergePlan) -> Vec<u64> {
        match plan {
            EmergePlan::SmallObject { length, .. } => vec![*length],
            EmergePlan::LargeObject { parts, .. } => parts.iter().map(|p| p.length()).collect(),
        }
    }

    #[test]
    fn test_small_object_below_threshold() {
        let planner = EmergePlanner::new(&limits(5 * MB, 5000 * MB, 10_000), None);
        let plan = planner.plan(&upload_intents(&[3 * MB as usize])).unwrap();
        assert!(!plan.is_large());
        assert_eq!(plan.total_length(), 3 * MB);
    }

    #[test]
    fn test_small_object_packs_multiple_sources() {
        let planner = EmergePlanner::new(&limits(100, 10_000, 100), None);
        let plan = planner.plan(&upload_intents(&[20, 30, 10])).unwrap();
        match plan {
            EmergePlan::SmallObject { definition, length } => {
                assert_eq!(length, 60);
                assert!(matches!(
                    definition,
                    EmergePartDefinition::UploadSubparts(_)
                ));
                assert!(definition.is_hashable());
            }
            other => panic!("expected small object, got {other:?}"),
        }
    }

    #[test]
    fn test_six_megabyte_file_splits_five_plus_one() {
        let planner = EmergePlanner::new(&limits(5 * MB, 5000 * MB, 10_000), None);
        let plan = planner.plan(&upload_intents(&[6 * MB as usize])).unwrap();
        assert!(plan.is_large());
        assert_eq!(plan_lengths(&plan), vec![5 * MB, MB]);
        match plan {
            EmergePlan::LargeObject { parts, .. } => {
                assert!(parts
                    .iter()
                    .all(|p| matches!(p, EmergePartDefinition::Upload(_))));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_large_copy_is_one_copy_part() {
        let planner = EmergePlanner::new(&limits(5 * MB, 5000 * MB, 10_000), None);
        let plan = planner.plan(&copy_intent(10 * MB)).unwrap();
        assert!(plan.is_large());
        match plan {
            EmergePlan::LargeObject { parts, .. } => {
                assert_eq!(parts.len(), 1);
                assert!(matches!(parts[0], EmergePartDefinition::Copy(_)));
                assert_eq!(parts[0].length(), 10 * MB);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_tiny_copy_still_uses_large_protocol() {
        let planner = EmergePlanner::new(&limits(10, 1000, 100), None);
        let plan = planner.plan(&copy_intent(4)).unwrap();
        assert!(plan.is_large());
        match plan {
            EmergePlan::LargeObject { parts, .. } => {
                assert_eq!(parts.len(), 1);
                // below the minimum, the copy becomes a streamed upload
                assert!(matches!(parts[0], EmergePartDefinition::UploadSubparts(_)));
                assert!(!parts[0].is_hashable());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_small_uploads_packed_into_subparts() {
        let planner = EmergePlanner::new(&limits(10, 1000, 100), None);
        let plan = planner.plan(&upload_intents(&[4, 4, 4])).unwrap();
        match plan {
            EmergePlan::LargeObject { parts, total_length } => {
                assert_eq!(total_length, 12);
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], EmergePartDefinition::UploadSubparts(_)));
                assert_eq!(parts[0].length(), 10);
                assert!(matches!(parts[1], EmergePartDefinition::Upload(_)));
                assert_eq!(parts[1].length(), 2);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_copy_head_tops_up_undersized_buffer() {
        let planner = EmergePlanner::new(&limits(10, 1000, 100), None);
        let intents = WriteIntent::wrap_sources(vec![
            OutboundSource::Upload(Arc::new(UploadSourceBytes::new(vec![7u8; 4]))),
            OutboundSource::Copy(Arc::new(CopySource::new("stored-x", 0, 25))),
        ]);

        let plan = planner.plan(&intents).unwrap();
        match plan {
            EmergePlan::LargeObject { parts, total_length } => {
                assert_eq!(total_length, 29);
                assert_eq!(parts.len(), 2);
                // 4 upload bytes + 6 copied bytes reach the minimum
                assert!(matches!(parts[0], EmergePartDefinition::UploadSubparts(_)));
                assert_eq!(parts[0].length(), 10);
                assert!(!parts[0].is_hashable());
                assert!(matches!(parts[1], EmergePartDefinition::Copy(_)));
                assert_eq!(parts[1].length(), 19);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_length_round_trip_invariant_and_minimums() {
        let planner = EmergePlanner::new(&limits(10, 100, 1000), None);
        let sizes: Vec<usize> = vec![3, 25, 7, 60, 2, 2, 2, 41];
        let total: u64 = sizes.iter().map(|&s| s as u64).sum();
        let plan = planner.plan(&upload_intents(&sizes)).unwrap();

        let lengths: Vec<u64> = plan_lengths(&plan);
        assert_eq!(lengths.iter().sum::<u64>(), total);
        for (i, len) in lengths.iter().enumerate() {
            if i + 1 < lengths.len() {
                assert!(*len >= 10, "part {i} is {len} bytes, below the minimum");
            }
        }
    }

    #[test]
    fn test_part_size_raised_to_fit_count_ceiling() {
        let planner = EmergePlanner::new(&limits(5, 1000, 3), None);
        let plan = planner.plan(&upload_intents(&[100])).unwrap();
        match plan {
            EmergePlan::LargeObject { parts, .. } => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts.iter().map(|p| p.length()).sum::<u64>(), 100);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_capacity_error_when_nothing_fits() {
        let planner = EmergePlanner::new(&limits(5, 10, 2), None);
        let result = planner.plan(&upload_intents(&[100]));
        assert!(matches!(result, Err(EmergeError::Capacity { .. })));
    }

    #[test]
    fn test_recommendation_below_minimum_is_ignored() {
        let planner = EmergePlanner::new(&limits(10, 1000, 100), Some(7));
        let plan = planner.plan(&upload_intents(&[25])).unwrap();
        assert_eq!(plan_lengths(&plan), vec![10, 10, 5]);
    }

    #[test]
    fn test_recommendation_sets_part_size() {
        let planner = EmergePlanner::new(&limits(10, 1000, 100), Some(20));
        let plan = planner.plan(&upload_intents(&[50])).unwrap();
        assert_eq!(plan_lengths(&plan), vec![20, 20, 10]);
    }

    #[test]
    fn test_huge_copy_split_is_equalized() {
        assert_eq!(equalized_copy_lengths(10, 100), vec![10]);
        assert_eq!(equalized_copy_lengths(100, 100), vec![100]);
        let sizes = equalized_copy_lengths(201, 100);
        assert_eq!(sizes, vec![67, 67, 67]);
        let sizes = equalized_copy_lengths(250, 100);
        assert_eq!(sizes.iter().sum::<u64>(), 250);
        assert!(sizes.iter().all(|&s| s == 83 || s == 84));
    }

    #[test]
    fn test_streaming_intake_validates_contiguity() {
        let planner = EmergePlanner::new(&limits(10, 1000, 100), None);
        let source = Arc::new(UploadSourceBytes::new(vec![1u8; 20]));
        let bad = vec![
            WriteIntent::new(OutboundSource::Upload(source.clone()), 0),
            WriteIntent::new(OutboundSource::Upload(source), 25),
        ];
        let result = planner.plan_from_iter(bad);
        assert!(matches!(result, Err(EmergeError::Validation { .. })));
    }
}
