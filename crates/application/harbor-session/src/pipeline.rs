use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use harbor_core::AppSnapshot;
use harbor_infra::archive::{zip_directory, ArchiveError};
use harbor_infra::net::{BundleUploader, UploadError};
use tracing::debug;

use crate::generation::GenerationGuard;
use crate::retry::retry_with_recovery;
use crate::transport::{SessionTransport, TransportError, UploadTargetParams};

#[derive(Debug)]
pub enum PipelineOutcome {
    /// The archive landed at the signed URL; use it as `assets_url`.
    Uploaded { assets_url: String },
    /// The generation was superseded at a checkpoint. No session state was
    /// touched past that point.
    Aborted,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("manifest generation failed: {0}")]
    Manifest(String),
    #[error("manifest serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("writing {path} failed: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("archiving bundle failed: {0}")]
    Archive(#[from] ArchiveError),
    #[error("archive task was cancelled")]
    ArchiveTask,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Produces a deployable archive from the build output directory and pushes
/// it to a signed upload target.
///
/// Every step is preceded by a generation staleness check: once a newer
/// change supersedes this generation, the pipeline short-circuits with
/// `Aborted` and performs no further side effects.
pub struct BundleUploadPipeline {
    transport: Arc<dyn SessionTransport>,
    uploader: BundleUploader,
    /// Directory the per-extension builds write into; archived wholesale.
    build_output_path: Utf8PathBuf,
}

impl BundleUploadPipeline {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        uploader: BundleUploader,
        build_output_path: Utf8PathBuf,
    ) -> Self {
        Self {
            transport,
            uploader,
            build_output_path,
        }
    }

    /// Manifest -> archive -> signed URL -> PUT. Returns the signed URL for
    /// use as the session's `assets_url`.
    pub async fn bundle_and_upload(
        &self,
        app: &Arc<dyn AppSnapshot>,
        params: UploadTargetParams,
        generation: &GenerationGuard,
    ) -> Result<PipelineOutcome, PipelineError> {
        if generation.is_superseded() {
            return Ok(PipelineOutcome::Aborted);
        }
        debug!("bundling and uploading extensions");

        // Overwrites whatever the previous generation wrote; manifests are
        // not versioned, only the latest matters.
        self.write_manifest(app).await?;

        if generation.is_superseded() {
            return Ok(PipelineOutcome::Aborted);
        }
        let archive_path = self.archive_path();
        self.archive_bundle(&archive_path).await?;

        if generation.is_superseded() {
            return Ok(PipelineOutcome::Aborted);
        }
        let signed_url = retry_with_recovery(
            || self.transport.upload_target(params.clone()),
            || self.transport.refresh_token(),
        )
        .await?;

        if generation.is_superseded() {
            return Ok(PipelineOutcome::Aborted);
        }
        self.uploader.put_archive(&signed_url, &archive_path).await?;

        Ok(PipelineOutcome::Uploaded {
            assets_url: signed_url,
        })
    }

    async fn write_manifest(&self, app: &Arc<dyn AppSnapshot>) -> Result<(), PipelineError> {
        let manifest = app
            .manifest()
            .map_err(|e| PipelineError::Manifest(e.to_string()))?;
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        let path = self.build_output_path.join("manifest.json");
        tokio::fs::write(path.as_std_path(), bytes)
            .await
            .map_err(|source| PipelineError::Io { path, source })
    }

    /// The archive sits next to the build output directory so it is never
    /// swept into its own zip.
    fn archive_path(&self) -> Utf8PathBuf {
        match self.build_output_path.parent() {
            Some(parent) => parent.join("bundle.zip"),
            None => Utf8PathBuf::from("bundle.zip"),
        }
    }

    async fn archive_bundle(&self, archive_path: &Utf8Path) -> Result<(), PipelineError> {
        let input = self.build_output_path.clone();
        let output = archive_path.to_owned();
        tokio::task::spawn_blocking(move || zip_directory(&input, &output))
            .await
            .map_err(|_| PipelineError::ArchiveTask)??;
        Ok(())
    }
}
