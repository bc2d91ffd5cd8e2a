//! Emerge execution: drives a plan against the storage service.
//!
//! The plan is read-only once it reaches the executor. Parts run on a
//! bounded worker pool and may complete in any order; the finish call
//! always lists them by index. Every retry opens a fresh stream; there
//! is no partial-stream resumption inside a single attempt.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use stowage_common::ProgressCallback;
use tracing::{info, warn};

use crate::emerge::part_definition::{
    BytesOpener, ChainOpener, EmergePartDefinition, PartId, RangeOpener, UploadSubpart,
    UploadSubpartsDefinition,
};
use crate::emerge::planner::EmergePlan;
use crate::error::EmergeError;
use crate::traits::{RemoteStorageClient, StreamOpener};
use crate::types::{
    EmergeOptions, EmergeTarget, FileDescriptor, PartDescriptor, RetrySettings, TransferProgress,
};

/// Executes emerge plans with bounded concurrency, retry, and correct
/// finalization or cancellation.
pub struct EmergeExecutor<C: RemoteStorageClient> {
    client: Arc<C>,
}

impl<C: RemoteStorageClient> EmergeExecutor<C> {
    /// Create an executor over a storage client.
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Run a plan to completion, returning the finalized object.
    ///
    /// On an irrecoverable part failure the remaining in-flight parts are
    /// drained, a best-effort cancel request is issued, and the
    /// lowest-numbered hard failure is surfaced.
    pub async fn execute_plan(
        &self,
        target: &EmergeTarget,
        plan: &EmergePlan,
        options: &EmergeOptions,
        progress: &dyn ProgressCallback<TransferProgress>,
    ) -> Result<FileDescriptor, EmergeError> {
        match plan {
            EmergePlan::SmallObject { definition, length } => {
                self.execute_small(target, definition, *length, options, progress)
                    .await
            }
            EmergePlan::LargeObject {
                parts,
                total_length,
            } => {
                self.execute_large(target, parts, *total_length, options, progress)
                    .await
            }
        }
    }

    async fn execute_small(
        &self,
        target: &EmergeTarget,
        definition: &EmergePartDefinition,
        length: u64,
        options: &EmergeOptions,
        progress: &dyn ProgressCallback<TransferProgress>,
    ) -> Result<FileDescriptor, EmergeError> {
        let sha1: String = definition.sha1()?.ok_or_else(|| {
            EmergeError::validation("whole-object upload requires locally hashable content")
        })?;
        let opener = definition.local_opener().ok_or_else(|| {
            EmergeError::validation("whole-object upload requires local content")
        })?;
        let opener_ref: &dyn StreamOpener = opener.as_ref();
        let sha1_ref: &str = sha1.as_str();

        let descriptor: FileDescriptor =
            run_with_retry(&options.retry, "whole-object upload", || async move {
                self.client
                    .upload_whole_object(
                        &target.bucket_id,
                        &target.object_name,
                        opener_ref,
                        length,
                        Some(sha1_ref),
                        &target.content_type,
                        &target.metadata,
                    )
                    .await
            })
            .await?;

        progress.on_progress(&TransferProgress {
            bytes_completed: length,
            total_bytes: length,
            parts_completed: 1,
            total_parts: 1,
        });
        info!(
            object_name = %target.object_name,
            length,
            "whole-object upload finished"
        );
        Ok(descriptor)
    }

    async fn execute_large(
        &self,
        target: &EmergeTarget,
        parts: &[EmergePartDefinition],
        total_length: u64,
        options: &EmergeOptions,
        progress: &dyn ProgressCallback<TransferProgress>,
    ) -> Result<FileDescriptor, EmergeError> {
        let file_id: String = match &options.resume_file_id {
            Some(id) => id.clone(),
            None => {
                run_with_retry(&options.retry, "start large file", || async move {
                    self.client
                        .start_large_file(
                            &target.bucket_id,
                            &target.object_name,
                            &target.content_type,
                            &target.metadata,
                        )
                        .await
                })
                .await?
            }
        };

        let completed: BTreeMap<u32, PartDescriptor> = if options.resume_file_id.is_some() {
            self.match_completed_parts(&file_id, parts, options).await?
        } else {
            BTreeMap::new()
        };

        let total_parts: u64 = parts.len() as u64;
        let parts_done = AtomicU64::new(completed.len() as u64);
        let bytes_done = AtomicU64::new(completed.values().map(|d| d.content_length).sum());
        let cancelled = AtomicBool::new(false);

        let pending: Vec<(u32, &EmergePartDefinition)> = parts
            .iter()
            .enumerate()
            .map(|(index, part)| (index as u32 + 1, part))
            .filter(|(part_number, _)| !completed.contains_key(part_number))
            .collect();

        let results: Vec<Result<(u32, PartDescriptor), (u32, EmergeError)>> =
            stream::iter(pending)
                .map(|(part_number, part)| {
                    let file_id: &str = file_id.as_str();
                    let cancelled: &AtomicBool = &cancelled;
                    let parts_done: &AtomicU64 = &parts_done;
                    let bytes_done: &AtomicU64 = &bytes_done;
                    async move {
                        // parts not yet started short-circuit after a failure;
                        // parts already in flight are left to finish
                        if cancelled.load(Ordering::Relaxed) {
                            return Err((part_number, EmergeError::Cancelled));
                        }
                        match self
                            .execute_part(file_id, part_number, part, &options.retry)
                            .await
                        {
                            Ok(descriptor) => {
                                let bytes: u64 = bytes_done
                                    .fetch_add(descriptor.content_length, Ordering::Relaxed)
                                    + descriptor.content_length;
                                let done: u64 = parts_done.fetch_add(1, Ordering::Relaxed) + 1;
                                let keep_going: bool = progress.on_progress(&TransferProgress {
                                    bytes_completed: bytes,
                                    total_bytes: total_length,
                                    parts_completed: done,
                                    total_parts,
                                });
                                if !keep_going {
                                    cancelled.store(true, Ordering::Relaxed);
                                }
                                Ok((part_number, descriptor))
                            }
                            Err(err) => {
                                cancelled.store(true, Ordering::Relaxed);
                                Err((
                                    part_number,
                                    EmergeError::PartFailure {
                                        part_number,
                                        source_id: part.source_id(),
                                        cause: Box::new(err),
                                    },
                                ))
                            }
                        }
                    }
                })
                .buffer_unordered(options.max_concurrency.max(1))
                .collect()
                .await;

        let mut descriptors: BTreeMap<u32, PartDescriptor> = completed;
        let mut first_failure: Option<(u32, EmergeError)> = None;
        for result in results {
            match result {
                Ok((part_number, descriptor)) => {
                    descriptors.insert(part_number, descriptor);
                }
                Err((_, EmergeError::Cancelled)) => {}
                Err((part_number, err)) => {
                    let is_earliest: bool = first_failure
                        .as_ref()
                        .map_or(true, |(failed_at, _)| part_number < *failed_at);
                    if is_earliest {
                        first_failure = Some((part_number, err));
                    }
                }
            }
        }

        if let Some((part_number, err)) = first_failure {
            warn!(%file_id, part_number, "part failed permanently, cancelling large file");
            self.cancel_best_effort(&file_id).await;
            return Err(err);
        }
        if cancelled.load(Ordering::Relaxed) {
            info!(%file_id, "transfer aborted by caller, cancelling large file");
            self.cancel_best_effort(&file_id).await;
            return Err(EmergeError::Cancelled);
        }

        let part_sha1s: Vec<String> = descriptors
            .values()
            .map(|d| d.content_sha1.clone())
            .collect();
        let file_id_ref: &str = file_id.as_str();
        let part_sha1s_ref: &[String] = part_sha1s.as_slice();
        let descriptor: FileDescriptor =
            run_with_retry(&options.retry, "finish large file", || async move {
                self.client
                    .finish_large_file(file_id_ref, part_sha1s_ref)
                    .await
            })
            .await?;
        info!(%file_id, parts = total_parts, total_length, "large file finished");
        Ok(descriptor)
    }

    /// Transfer one part, with per-part retry. Every attempt opens fresh
    /// streams; packed parts re-fetch their remote fragments as well.
    async fn execute_part(
        &self,
        file_id: &str,
        part_number: u32,
        part: &EmergePartDefinition,
        retry: &RetrySettings,
    ) -> Result<PartDescriptor, EmergeError> {
        match part {
            EmergePartDefinition::Copy(copy) => {
                let (offset, length) = copy.absolute_range();
                run_with_retry(retry, "copy part", || async move {
                    self.client
                        .copy_part(file_id, part_number, copy.source_file_id(), offset, length)
                        .await
                })
                .await
            }
            EmergePartDefinition::Upload(upload) => {
                let sha1: String = upload.sha1()?;
                let opener = upload.opener();
                let length: u64 = upload.length();
                let opener_ref: &dyn StreamOpener = opener.as_ref();
                let sha1_ref: &str = sha1.as_str();
                run_with_retry(retry, "upload part", || async move {
                    self.client
                        .upload_part(file_id, part_number, opener_ref, length, Some(sha1_ref))
                        .await
                })
                .await
            }
            EmergePartDefinition::UploadSubparts(packed) => {
                let sha1: Option<String> = packed.sha1()?;
                let length: u64 = packed.length();
                let sha1_ref: Option<&str> = sha1.as_deref();
                run_with_retry(retry, "upload packed part", || async move {
                    let opener: ChainOpener = self.materialize_packed_opener(packed).await?;
                    self.client
                        .upload_part(file_id, part_number, &opener, length, sha1_ref)
                        .await
                })
                .await
            }
        }
    }

    /// Build the chained opener for a packed part, fetching the bytes of
    /// any remote fragments. Called once per attempt so retries stream
    /// freshly fetched content.
    async fn materialize_packed_opener(
        &self,
        packed: &UploadSubpartsDefinition,
    ) -> Result<ChainOpener, EmergeError> {
        let mut links: Vec<Arc<dyn StreamOpener>> = Vec::with_capacity(packed.subparts().len());
        for subpart in packed.subparts() {
            match subpart {
                UploadSubpart::Local {
                    source,
                    relative_offset,
                    length,
                } => {
                    links.push(Arc::new(RangeOpener::new(
                        source.clone(),
                        *relative_offset,
                        *length,
                    )));
                }
                UploadSubpart::Remote {
                    source,
                    relative_offset,
                    length,
                } => {
                    let (offset, length) = source.absolute_range(*relative_offset, *length);
                    let bytes: Vec<u8> = self
                        .client
                        .download_file_range(&source.source_file_id, offset, length)
                        .await?;
                    links.push(Arc::new(BytesOpener::new(bytes)));
                }
            }
        }
        Ok(ChainOpener::new(links))
    }

    /// List what the service already holds for an unfinished large file
    /// and match it against the plan, index by index. Matching stops at
    /// the first part whose identity or length differs.
    async fn match_completed_parts(
        &self,
        file_id: &str,
        parts: &[EmergePartDefinition],
        options: &EmergeOptions,
    ) -> Result<BTreeMap<u32, PartDescriptor>, EmergeError> {
        let mut uploaded: BTreeMap<u32, PartDescriptor> = BTreeMap::new();
        let mut start_part_number: u32 = 1;
        loop {
            let page = self
                .client
                .list_parts(file_id, start_part_number, options.list_parts_batch_size)
                .await?;
            for descriptor in page.parts {
                uploaded.insert(descriptor.part_number, descriptor);
            }
            match page.next_part_number {
                Some(next) => start_part_number = next,
                None => break,
            }
        }

        let mut matched: BTreeMap<u32, PartDescriptor> = BTreeMap::new();
        for (index, part) in parts.iter().enumerate() {
            let part_number: u32 = index as u32 + 1;
            let Some(descriptor) = uploaded.get(&part_number) else {
                break;
            };
            // only content-identified parts can be matched against what
            // the service reports; a structural identity never matches
            if !part.is_hashable() || descriptor.content_length != part.length() {
                break;
            }
            let listed = PartId::ContentSha1(descriptor.content_sha1.clone());
            if part.part_id()? != listed {
                break;
            }
            matched.insert(part_number, descriptor.clone());
        }
        info!(
            file_id,
            matched = matched.len(),
            uploaded = uploaded.len(),
            "matched already-uploaded parts for resume"
        );
        Ok(matched)
    }

    async fn cancel_best_effort(&self, file_id: &str) {
        if let Err(err) = self.client.cancel_large_file(file_id).await {
            warn!(%err, file_id, "cancel request failed; unfinished file may remain");
        }
    }
}

/// Run one remote operation with bounded retry.
///
/// Transient transport failures back off exponentially up to
/// `max_attempts` total attempts. An integrity rejection gets exactly one
/// immediate retry, since a stream bug is indistinguishable from
/// transport corruption until a fresh stream has been tried; a repeat is
/// fatal.
async fn run_with_retry<T, F, Fut>(
    retry: &RetrySettings,
    label: &str,
    mut attempt_fn: F,
) -> Result<T, EmergeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EmergeError>>,
{
    let mut attempts: u32 = 0;
    let mut integrity_retried: bool = false;
    loop {
        attempts += 1;
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempts < retry.max_attempts => {
                let delay = retry.backoff_delay(attempts);
                warn!(%err, attempts, ?delay, "{label} failed, backing off");
                tokio::time::sleep(delay).await;
            }
            Err(err @ EmergeError::Integrity { .. }) if !integrity_retried => {
                integrity_retried = true;
                warn!(%err, "{label} rejected by integrity check, retrying with a fresh stream");
            }
            Err(err) => return Err(err),
        }
    }
}
