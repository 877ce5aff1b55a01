//! Download executor: one item, two phases
//!
//! 1. **Native attempt**: a single extractor invocation with the JavaScript
//!    runtime and remote solver enabled. The output must be of the kind the
//!    item needs (muxed video, or audio in music mode); anything else is
//!    rejected.
//! 2. **Fallback ladder**: the configured extractor profiles, folded in order
//!    through [`run_ladder`] until one produces an acceptable output.
//!
//! The extractor always writes into a private staging directory under the
//! temp dir. Only an accepted file is moved into the destination folder, and
//! the staging directory is removed on every exit path.
//!
//! Cancellation is observed before the native attempt, between the phases and
//! between ladder steps. It is never forced mid-transfer.

use crate::config::{Config, ExtractorProfile};
use crate::extractor::{ExtractionOutput, ExtractionRequest, Extractor, ProgressSink};
use crate::retry::{BackoffPolicy, LadderOutcome, StepFailure, run_ladder};
use crate::types::{DownloadAttempt, DownloadOptions, ErrorKind, OutputKind, SourceItem, Strategy};
use crate::utils::{
    get_available_space, move_into_place, pretty_file_name, sanitize_filename,
    unique_destination_path,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod formats;

/// Executor settings derived from [`Config`]
#[derive(Clone, Debug)]
pub struct ExecutorSettings {
    /// Parent of per-item staging directories
    pub temp_dir: PathBuf,
    /// Minimum free space in the destination before an attempt starts
    pub min_free_space: u64,
    /// Upper bound for a single extractor invocation
    pub attempt_timeout: Duration,
    /// Cookie file for profiles with `use_cookies`
    pub cookies_file: Option<PathBuf>,
    /// Ladder bounds and backoff
    pub backoff: BackoffPolicy,
    /// Ordered fallback profiles
    pub ladder: Vec<ExtractorProfile>,
}

impl ExecutorSettings {
    /// Derive settings from the full configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            temp_dir: config.download.temp_dir.clone(),
            min_free_space: config.download.min_free_space,
            attempt_timeout: config.download.attempt_timeout,
            cookies_file: config.tools.cookies_file.clone(),
            backoff: BackoffPolicy::from(&config.retry),
            ladder: config.fallback_ladder(),
        }
    }
}

/// Executes single items against an [`Extractor`]
pub struct DownloadExecutor {
    extractor: Arc<dyn Extractor>,
    settings: ExecutorSettings,
}

impl DownloadExecutor {
    /// Create an executor
    pub fn new(extractor: Arc<dyn Extractor>, settings: ExecutorSettings) -> Self {
        Self {
            extractor,
            settings,
        }
    }

    /// Active settings
    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Download one item into `folder`
    ///
    /// Never returns an error: every failure is classified into the returned
    /// [`DownloadAttempt`].
    pub async fn execute(
        &self,
        item: &SourceItem,
        folder: &Path,
        options: &DownloadOptions,
        cancel: &CancellationToken,
        progress: ProgressSink,
    ) -> DownloadAttempt {
        if cancel.is_cancelled() {
            return DownloadAttempt::failed(
                Strategy::Native,
                ErrorKind::Cancelled,
                0,
                Some("cancelled before download started".into()),
            );
        }

        if let Err(message) = self.prepare_destination(folder).await {
            tracing::error!(item_id = %item.id, folder = %folder.display(), error = %message, "Destination unusable");
            return DownloadAttempt::failed(Strategy::Native, ErrorKind::Disk, 0, Some(message));
        }

        let staging = self.staging_dir_for(item);
        if let Err(e) = tokio::fs::create_dir_all(&staging).await {
            return DownloadAttempt::failed(
                Strategy::Native,
                ErrorKind::Disk,
                0,
                Some(format!("Failed to create staging dir {}: {}", staging.display(), e)),
            );
        }

        let attempt = self
            .execute_staged(item, folder, options, cancel, progress, &staging)
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(staging = %staging.display(), error = %e, "Failed to remove staging dir");
        }

        attempt
    }

    async fn execute_staged(
        &self,
        item: &SourceItem,
        folder: &Path,
        options: &DownloadOptions,
        cancel: &CancellationToken,
        progress: ProgressSink,
        staging: &Path,
    ) -> DownloadAttempt {
        let expected = formats::expected_kind(options);

        // Phase 1: native
        let native = self.native_request(item, options, staging);
        let output = self.extractor.extract(&native, progress.clone()).await;

        if output.success && output.output_kind == expected {
            tracing::info!(item_id = %item.id, "Native attempt produced accepted output");
            return self
                .finalize(item, folder, output, Strategy::Native, 0, "native")
                .await;
        }

        let native_kind = if output.success {
            tracing::warn!(
                item_id = %item.id,
                produced = ?output.output_kind,
                expected = ?expected,
                "Rejecting native output; entering fallback"
            );
            clear_dir(staging).await;
            ErrorKind::ExtractorRejected
        } else {
            let kind = output.error_kind.unwrap_or(ErrorKind::ExtractorRejected);
            tracing::warn!(
                item_id = %item.id,
                error_kind = %kind,
                diagnostic = %last_line(&output.diagnostic),
                "Native attempt failed"
            );
            kind
        };

        if native_kind == ErrorKind::Disk {
            return DownloadAttempt::failed(
                Strategy::Native,
                ErrorKind::Disk,
                0,
                Some(output.diagnostic),
            );
        }

        if cancel.is_cancelled() {
            return DownloadAttempt::failed(
                Strategy::Native,
                ErrorKind::Cancelled,
                0,
                Some("cancelled after native attempt".into()),
            );
        }

        // Phase 2: fallback ladder
        let outcome = run_ladder(
            &self.settings.ladder,
            &self.settings.backoff,
            cancel,
            |profile, step| {
                let request = self.profile_request(item, options, staging, profile);
                let extractor = Arc::clone(&self.extractor);
                let progress = progress.clone();
                let staging = staging.to_path_buf();
                let item_id = item.id.clone();
                async move {
                    clear_dir(&staging).await;
                    tracing::info!(item_id = %item_id, profile = %request.profile, step, "Trying fallback profile");
                    let output = extractor.extract(&request, progress).await;
                    accept(output, expected).map(|output| (output, request.profile))
                }
            },
        )
        .await;

        match outcome {
            LadderOutcome::Accepted {
                value: (output, profile),
                steps,
            } => {
                self.finalize(item, folder, output, Strategy::Fallback, steps, &profile)
                    .await
            }
            LadderOutcome::Failed { failure, steps } => {
                tracing::error!(
                    item_id = %item.id,
                    error_kind = %failure.kind,
                    steps,
                    "All download strategies failed"
                );
                DownloadAttempt::failed(Strategy::Fallback, failure.kind, steps, Some(failure.message))
            }
        }
    }

    async fn prepare_destination(&self, folder: &Path) -> Result<(), String> {
        tokio::fs::create_dir_all(folder)
            .await
            .map_err(|e| format!("Failed to create destination {}: {}", folder.display(), e))?;

        match get_available_space(folder) {
            Ok(available) if available < self.settings.min_free_space => Err(format!(
                "Insufficient disk space: {} bytes available, {} required",
                available, self.settings.min_free_space
            )),
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(folder = %folder.display(), error = %e, "Could not check free space");
                Ok(())
            }
        }
    }

    fn staging_dir_for(&self, item: &SourceItem) -> PathBuf {
        let suffix: u32 = rand::random();
        self.settings
            .temp_dir
            .join(format!("{}-{:08x}", sanitize_filename(&item.id), suffix))
    }

    fn base_request(
        &self,
        item: &SourceItem,
        options: &DownloadOptions,
        staging: &Path,
    ) -> ExtractionRequest {
        ExtractionRequest {
            item_id: item.id.clone(),
            url: item.url.clone(),
            staging_dir: staging.to_path_buf(),
            format: String::new(),
            profile: String::new(),
            client: None,
            headers: Default::default(),
            cookies_file: None,
            js_solver: false,
            audio_format: formats::audio_format(options),
            merge_format: formats::merge_format(options),
            timeout: self.settings.attempt_timeout,
        }
    }

    fn native_request(
        &self,
        item: &SourceItem,
        options: &DownloadOptions,
        staging: &Path,
    ) -> ExtractionRequest {
        ExtractionRequest {
            format: formats::native_format(options).to_string(),
            profile: "native".to_string(),
            js_solver: true,
            ..self.base_request(item, options, staging)
        }
    }

    fn profile_request(
        &self,
        item: &SourceItem,
        options: &DownloadOptions,
        staging: &Path,
        profile: &ExtractorProfile,
    ) -> ExtractionRequest {
        ExtractionRequest {
            format: formats::ladder_format(profile.format, options).to_string(),
            profile: profile.name.clone(),
            client: profile.client.clone(),
            headers: profile.headers.clone(),
            cookies_file: if profile.use_cookies {
                self.settings.cookies_file.clone()
            } else {
                None
            },
            ..self.base_request(item, options, staging)
        }
    }

    async fn finalize(
        &self,
        item: &SourceItem,
        folder: &Path,
        output: ExtractionOutput,
        strategy: Strategy,
        retry_count: u32,
        profile: &str,
    ) -> DownloadAttempt {
        let Some(staged) = output.output_path else {
            return DownloadAttempt::failed(
                strategy,
                ErrorKind::UnsupportedFormat,
                retry_count,
                Some("accepted output has no file".into()),
            );
        };

        let extension = staged.extension().and_then(|e| e.to_str());
        let desired = folder.join(pretty_file_name(item, extension));

        let moved = match unique_destination_path(&desired) {
            Ok(dest) => move_into_place(&staged, &dest)
                .await
                .map(|()| dest)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match moved {
            Ok(dest) => {
                tracing::info!(
                    item_id = %item.id,
                    path = %dest.display(),
                    strategy = ?strategy,
                    profile,
                    "Download finalized"
                );
                DownloadAttempt {
                    strategy,
                    ok: true,
                    output_kind: output.output_kind,
                    error_kind: None,
                    retry_count,
                    output_path: Some(dest),
                    profile: Some(profile.to_string()),
                    message: None,
                }
            }
            Err(message) => {
                tracing::error!(item_id = %item.id, error = %message, "Failed to move download into place");
                DownloadAttempt::failed(
                    strategy,
                    ErrorKind::Disk,
                    retry_count,
                    Some(format!("Failed to move download into place: {message}")),
                )
            }
        }
    }
}

/// Map an extractor output to a ladder step result
fn accept(output: ExtractionOutput, expected: OutputKind) -> Result<ExtractionOutput, StepFailure> {
    if output.success && output.output_kind == expected {
        return Ok(output);
    }
    if output.success {
        // Wrong kind from this profile; the next one may do better
        return Err(StepFailure::new(
            ErrorKind::ExtractorRejected,
            format!("profile produced {:?} output, needed {:?}", output.output_kind, expected),
        ));
    }
    Err(StepFailure::new(
        output.error_kind.unwrap_or(ErrorKind::ExtractorRejected),
        output.diagnostic,
    ))
}

/// Remove everything inside `dir`, keeping the directory
async fn clear_dir(dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let result = if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(e) = result {
            tracing::debug!(path = %path.display(), error = %e, "Failed to clear staged file");
        }
    }
}

fn last_line(diagnostic: &str) -> &str {
    diagnostic.lines().last().unwrap_or("")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
