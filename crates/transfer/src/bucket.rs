//! Bucket facade: the caller-facing entry points.
//!
//! Every method funnels into the same validate/plan/execute path, so a
//! byte-for-byte identical object comes out whether the caller handed us
//! a file path, an in-memory buffer, or a hand-built intent sequence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use stowage_common::{NoOpProgress, ProgressCallback, AUTO_CONTENT_TYPE};

use crate::emerge::{
    EmergeExecutor, EmergePlan, EmergePlanner, OutboundSource, WriteIntent,
};
use crate::error::EmergeError;
use crate::source::{UploadSource, UploadSourceBytes, UploadSourceLocalFile};
use crate::traits::RemoteStorageClient;
use crate::types::{EmergeOptions, EmergeTarget, FileDescriptor, ServiceLimits, TransferProgress};
use crate::validation::{validate_metadata, validate_object_name};

/// Access to one bucket: creating objects from local and remote sources.
pub struct Bucket<C: RemoteStorageClient> {
    client: Arc<C>,
    bucket_id: String,
    limits: ServiceLimits,
}

impl<C: RemoteStorageClient> Bucket<C> {
    /// Create a bucket handle with the service's default limits.
    pub fn new(client: Arc<C>, bucket_id: impl Into<String>) -> Self {
        Self::with_limits(client, bucket_id, ServiceLimits::default())
    }

    /// Create a bucket handle with explicit service limits.
    pub fn with_limits(
        client: Arc<C>,
        bucket_id: impl Into<String>,
        limits: ServiceLimits,
    ) -> Self {
        Self {
            client,
            bucket_id: bucket_id.into(),
            limits,
        }
    }

    /// Service limits this handle plans against.
    pub fn limits(&self) -> &ServiceLimits {
        &self.limits
    }

    /// Upload bytes in memory as one object.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        object_name: &str,
        content_type: Option<&str>,
        metadata: Option<HashMap<String, String>>,
        options: &EmergeOptions,
        progress: Option<&dyn ProgressCallback<TransferProgress>>,
    ) -> Result<FileDescriptor, EmergeError> {
        self.upload(
            Arc::new(UploadSourceBytes::new(data)),
            object_name,
            content_type,
            metadata,
            options,
            progress,
        )
        .await
    }

    /// Upload a file on local disk as one object.
    pub async fn upload_local_file(
        &self,
        local_path: impl AsRef<Path>,
        object_name: &str,
        content_type: Option<&str>,
        metadata: Option<HashMap<String, String>>,
        options: &EmergeOptions,
        progress: Option<&dyn ProgressCallback<TransferProgress>>,
    ) -> Result<FileDescriptor, EmergeError> {
        self.upload(
            Arc::new(UploadSourceLocalFile::new(local_path)?),
            object_name,
            content_type,
            metadata,
            options,
            progress,
        )
        .await
    }

    /// Upload any re-openable source as one object.
    pub async fn upload(
        &self,
        source: Arc<dyn UploadSource>,
        object_name: &str,
        content_type: Option<&str>,
        metadata: Option<HashMap<String, String>>,
        options: &EmergeOptions,
        progress: Option<&dyn ProgressCallback<TransferProgress>>,
    ) -> Result<FileDescriptor, EmergeError> {
        self.create_file(
            vec![WriteIntent::entire_upload(source)],
            object_name,
            content_type,
            metadata,
            options,
            progress,
        )
        .await
    }

    /// Build one object from an ordered list of sources, each starting
    /// where the previous one ended.
    pub async fn concatenate(
        &self,
        sources: Vec<OutboundSource>,
        object_name: &str,
        content_type: Option<&str>,
        metadata: Option<HashMap<String, String>>,
        options: &EmergeOptions,
        progress: Option<&dyn ProgressCallback<TransferProgress>>,
    ) -> Result<FileDescriptor, EmergeError> {
        self.create_file(
            WriteIntent::wrap_sources(sources),
            object_name,
            content_type,
            metadata,
            options,
            progress,
        )
        .await
    }

    /// Streaming variant of [`Bucket::concatenate`] for sources
    /// discovered incrementally.
    pub async fn concatenate_stream(
        &self,
        sources: impl IntoIterator<Item = OutboundSource>,
        object_name: &str,
        content_type: Option<&str>,
        metadata: Option<HashMap<String, String>>,
        options: &EmergeOptions,
        progress: Option<&dyn ProgressCallback<TransferProgress>>,
    ) -> Result<FileDescriptor, EmergeError> {
        self.create_file_stream(
            wrap_sources_iter(sources),
            object_name,
            content_type,
            metadata,
            options,
            progress,
        )
        .await
    }

    /// Create one object from an ordered, gap-free intent sequence.
    pub async fn create_file(
        &self,
        write_intents: Vec<WriteIntent>,
        object_name: &str,
        content_type: Option<&str>,
        metadata: Option<HashMap<String, String>>,
        options: &EmergeOptions,
        progress: Option<&dyn ProgressCallback<TransferProgress>>,
    ) -> Result<FileDescriptor, EmergeError> {
        let metadata: HashMap<String, String> =
            self.validate_request(object_name, metadata)?;
        let planner: EmergePlanner =
            EmergePlanner::new(&self.limits, options.recommended_part_size);
        let plan: EmergePlan = planner.plan(&write_intents)?;
        self.emerge(plan, object_name, content_type, metadata, options, progress)
            .await
    }

    /// Create one object from a lazily produced intent sequence, for
    /// callers who do not know the full intent set up front.
    pub async fn create_file_stream(
        &self,
        write_intents: impl IntoIterator<Item = WriteIntent>,
        object_name: &str,
        content_type: Option<&str>,
        metadata: Option<HashMap<String, String>>,
        options: &EmergeOptions,
        progress: Option<&dyn ProgressCallback<TransferProgress>>,
    ) -> Result<FileDescriptor, EmergeError> {
        let metadata: HashMap<String, String> =
            self.validate_request(object_name, metadata)?;
        let planner: EmergePlanner =
            EmergePlanner::new(&self.limits, options.recommended_part_size);
        let plan: EmergePlan = planner.plan_from_iter(write_intents)?;
        self.emerge(plan, object_name, content_type, metadata, options, progress)
            .await
    }

    /// Cancel an unfinished large file so the service reclaims its parts.
    pub async fn cancel_large_file(&self, large_file_id: &str) -> Result<(), EmergeError> {
        self.client.cancel_large_file(large_file_id).await
    }

    /// Name and metadata checks shared by both intake paths; runs before
    /// planning so nothing later can mask a validation error.
    fn validate_request(
        &self,
        object_name: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<HashMap<String, String>, EmergeError> {
        validate_object_name(object_name)?;
        let metadata: HashMap<String, String> = metadata.unwrap_or_default();
        validate_metadata(&metadata)?;
        Ok(metadata)
    }

    async fn emerge(
        &self,
        plan: EmergePlan,
        object_name: &str,
        content_type: Option<&str>,
        metadata: HashMap<String, String>,
        options: &EmergeOptions,
        progress: Option<&dyn ProgressCallback<TransferProgress>>,
    ) -> Result<FileDescriptor, EmergeError> {
        let target = EmergeTarget {
            bucket_id: self.bucket_id.clone(),
            object_name: object_name.to_string(),
            content_type: content_type.unwrap_or(AUTO_CONTENT_TYPE).to_string(),
            metadata,
        };
        let executor: EmergeExecutor<C> = EmergeExecutor::new(self.client.clone());
        match progress {
            Some(progress) => executor.execute_plan(&target, &plan, options, progress).await,
            None => {
                executor
                    .execute_plan(&target, &plan, options, &NoOpProgress)
                    .await
            }
        }
    }
}

/// Assign contiguous destination offsets to sources as they stream in.
fn wrap_sources_iter(
    sources: impl IntoIterator<Item = OutboundSource>,
) -> impl Iterator<Item = WriteIntent> {
    let mut offset: u64 = 0;
    sources.into_iter().map(move |source| {
        let intent = WriteIntent::new(source, offset);
        offset = intent.destination_end();
        intent
    })
}
