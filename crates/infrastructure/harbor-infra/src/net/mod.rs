use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Client;
use tracing::debug;

/// Timeout class for the archive PUT. Bundle uploads can be large and slow,
/// so they get a much longer deadline than ordinary API calls, which use the
/// client default.
const SLOW_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("reading archive {path} failed: {source}")]
    ReadArchive {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upload rejected with status {status}")]
    Status { status: u16 },
}

/// Pushes bundle archives to pre-signed upload URLs.
pub struct BundleUploader {
    client: Client,
}

impl BundleUploader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// PUT the archive bytes to a signed URL issued by the remote service.
    ///
    /// The request is not retried here: the signed URL is time-limited and
    /// the caller decides whether a fresh URL (and a fresh attempt) is worth
    /// it after a failure.
    pub async fn put_archive(
        &self,
        signed_url: &str,
        archive_path: &Utf8Path,
    ) -> Result<(), UploadError> {
        let bytes = tokio::fs::read(archive_path.as_std_path())
            .await
            .map_err(|source| UploadError::ReadArchive {
                path: archive_path.to_owned(),
                source,
            })?;

        debug!(size = bytes.len(), "uploading bundle archive");

        let resp = self
            .client
            .put(signed_url)
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .timeout(SLOW_REQUEST_TIMEOUT)
            .body(bytes)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(UploadError::Status {
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}
