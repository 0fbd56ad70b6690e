use std::sync::Arc;
use std::time::Instant;

use camino::Utf8PathBuf;
use harbor_core::{AppEvent, DevSessionPayload, DevSessionResult, StatusMessage, UserError};
use harbor_infra::net::BundleUploader;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;

use crate::generation::{GenerationGuard, Generations};
use crate::logger::{PrefixedError, SessionLogger};
use crate::pipeline::{BundleUploadPipeline, PipelineError, PipelineOutcome};
use crate::retry::retry_with_recovery;
use crate::status::{DevSessionStatusManager, StatusUpdate};
use crate::transport::{SessionTransport, TransportError, UploadTargetParams};

/// Messages from the external watcher. The watcher batches builds per
/// change-set and sends one message per batch over an mpsc channel; the
/// coordinator is the single consumer.
#[derive(Debug)]
pub enum WatcherMessage {
    /// The initial build finished. Sent exactly once, before any `Changed`.
    Started(AppEvent),
    /// A subsequent batch of detected changes.
    Changed(AppEvent),
    /// The watcher itself failed.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DevSessionOptions {
    pub store_fqdn: String,
    pub app_id: String,
    pub organization_id: String,
    /// Directory the watcher's builds write into; archived per upload.
    pub build_output_path: Utf8PathBuf,
    /// Preview location when at least one extension is previewable.
    pub app_local_proxy_url: String,
    /// Persistent preview location used otherwise.
    pub app_preview_url: String,
}

/// Conditions the coordinator cannot recover from. The caller (the `dev`
/// command) decides how to terminate; the coordinator itself never exits the
/// process.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("dev session aborted, build errors detected in extensions")]
    StartupBuildFailed,
    #[error("unauthorized")]
    Unauthenticated,
    #[error("auth session expired, run the authentication flow and start dev again")]
    AuthSessionExpired,
    #[error("failed to start dev session")]
    SessionNeverReady,
    #[error("{0}")]
    Fatal(String),
}

/// Orchestrates the dev session: consumes watcher messages, keeps one upload
/// generation active at a time, and reconciles upload outcomes into the
/// session status.
pub struct DevSessionCoordinator {
    options: DevSessionOptions,
    transport: Arc<dyn SessionTransport>,
    pipeline: BundleUploadPipeline,
    status: DevSessionStatusManager,
    logger: Arc<dyn SessionLogger>,
    generations: Arc<Generations>,
}

impl DevSessionCoordinator {
    pub fn new(
        options: DevSessionOptions,
        transport: Arc<dyn SessionTransport>,
        logger: Arc<dyn SessionLogger>,
        client: reqwest::Client,
    ) -> Arc<Self> {
        let pipeline = BundleUploadPipeline::new(
            Arc::clone(&transport),
            BundleUploader::new(client),
            options.build_output_path.clone(),
        );
        Arc::new(Self {
            options,
            transport,
            pipeline,
            status: DevSessionStatusManager::new(),
            logger,
            generations: Generations::new(),
        })
    }

    /// Read-only view of the session status for UIs and callers.
    pub fn status_manager(&self) -> DevSessionStatusManager {
        self.status.clone()
    }

    /// Consume watcher messages until the channel closes or a fatal
    /// condition is hit.
    ///
    /// The initial `Started` upload is awaited inline: nothing useful can
    /// happen before the session exists. Subsequent uploads run as spawned
    /// tasks so a newer change can supersede one still in flight.
    pub async fn start(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<WatcherMessage>,
    ) -> Result<(), CoordinatorError> {
        self.logger.info("Preparing dev session");
        self.status.set_message(StatusMessage::Loading);

        let mut uploads: JoinSet<Result<(), CoordinatorError>> = JoinSet::new();

        loop {
            tokio::select! {
                maybe_msg = rx.recv() => {
                    let Some(msg) = maybe_msg else { break };
                    match msg {
                        WatcherMessage::Started(event) => self.on_start(event).await?,
                        WatcherMessage::Changed(event) => {
                            if let Some(guard) = self.prepare_event(&event) {
                                let this = Arc::clone(&self);
                                uploads.spawn(async move {
                                    this.upload_and_handle(event, guard).await
                                });
                            }
                        }
                        WatcherMessage::Failed(error) => {
                            self.handle_result(DevSessionResult::UnknownError(error), None)
                                .await?;
                        }
                    }
                }
                Some(joined) = uploads.join_next() => {
                    Self::check_joined(joined)?;
                }
            }
        }

        // Watcher gone; let in-flight uploads settle before returning.
        while let Some(joined) = uploads.join_next().await {
            Self::check_joined(joined)?;
        }
        Ok(())
    }

    fn check_joined(
        joined: Result<Result<(), CoordinatorError>, tokio::task::JoinError>,
    ) -> Result<(), CoordinatorError> {
        match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                Err(CoordinatorError::Fatal("upload task panicked".into()))
            }
            Err(_) => Ok(()),
        }
    }

    /// Initial build, before any change is detected. A dev session cannot
    /// begin with a broken build.
    pub async fn on_start(&self, event: AppEvent) -> Result<(), CoordinatorError> {
        if event.has_build_errors() {
            let errors: Vec<PrefixedError> = event
                .failed_events()
                .map(|ev| PrefixedError {
                    prefix: ev.extension.handle.clone(),
                    message: "Build error. Please review your code and try again.".into(),
                })
                .collect();
            self.logger.log_multiple_errors(&errors);
            return Err(CoordinatorError::StartupBuildFailed);
        }

        let guard = self.generations.begin();
        let result = self.bundle_and_upload(&event, &guard).await?;
        self.handle_result(result, Some(&event)).await
    }

    /// Gate a change event and, when it should trigger an upload, supersede
    /// every older generation and hand back a guard for the new one.
    pub fn prepare_event(&self, event: &AppEvent) -> Option<GenerationGuard> {
        if !self.status.status().is_ready {
            // Changes before the first successful session creation are not
            // buildable deltas; they have to wait.
            self.logger
                .warning("Change detected, but dev session is not ready yet.");
            return None;
        }

        if event.has_build_errors() {
            self.status.set_message(StatusMessage::BuildError);
            return None;
        }

        if event.is_empty() {
            // App-level reload that touched no extension; nothing to upload.
            self.status.set_message(StatusMessage::Ready);
            return None;
        }

        self.status.set_message(StatusMessage::ChangeDetected);
        self.update_preview_url(event);

        // Beginning the new generation cancels every tracked one; older
        // uploads observe it at their next checkpoint.
        let guard = self.generations.begin();
        self.logger.log_extension_events(event);
        Some(guard)
    }

    pub async fn upload_and_handle(
        &self,
        event: AppEvent,
        guard: GenerationGuard,
    ) -> Result<(), CoordinatorError> {
        let network_start = Instant::now();
        let result = self.bundle_and_upload(&event, &guard).await?;
        self.handle_result(result, Some(&event)).await?;
        debug!(
            network_ms = network_start.elapsed().as_millis() as u64,
            total_ms = event.started_at.elapsed().as_millis() as u64,
            "event handled"
        );
        Ok(())
    }

    fn update_preview_url(&self, event: &AppEvent) {
        let url = if event.any_previewable() {
            self.options.app_local_proxy_url.clone()
        } else {
            self.options.app_preview_url.clone()
        };
        self.status.update_status(StatusUpdate {
            is_ready: false,
            preview_url: Some(url),
        });
    }

    /// Run the pipeline, then create or update the session depending on
    /// whether it already exists.
    pub async fn bundle_and_upload(
        &self,
        event: &AppEvent,
        guard: &GenerationGuard,
    ) -> Result<DevSessionResult, CoordinatorError> {
        let params = UploadTargetParams {
            api_key: self.options.app_id.clone(),
            organization_id: self.options.organization_id.clone(),
            id: self.options.app_id.clone(),
        };

        let assets_url = match self.pipeline.bundle_and_upload(&event.app, params, guard).await {
            Ok(PipelineOutcome::Uploaded { assets_url }) => assets_url,
            Ok(PipelineOutcome::Aborted) => return Ok(DevSessionResult::Aborted),
            Err(err) => return self.classify_pipeline_error(err),
        };

        let payload = DevSessionPayload {
            shop_fqdn: self.options.store_fqdn.clone(),
            app_id: self.options.app_id.clone(),
            assets_url,
        };

        // Last checkpoint. A generation that passes it can still race a
        // newer one at the remote service; cancellation is cooperative and
        // does not kill requests already issued.
        if guard.is_superseded() {
            return Ok(DevSessionResult::Aborted);
        }

        let was_ready = self.status.status().is_ready;
        let outcome = if was_ready {
            retry_with_recovery(
                || self.transport.dev_session_update(payload.clone()),
                || self.transport.refresh_token(),
            )
            .await
        } else {
            retry_with_recovery(
                || self.transport.dev_session_create(payload.clone()),
                || self.transport.refresh_token(),
            )
            .await
        };

        match outcome {
            Ok(result) if !result.user_errors.is_empty() => {
                Ok(DevSessionResult::RemoteError(result.user_errors))
            }
            Ok(_) if was_ready => Ok(DevSessionResult::Updated),
            Ok(_) => Ok(DevSessionResult::Created),
            Err(err) => self.classify_transport_error(err),
        }
    }

    /// Reconcile one upload outcome into status and logs.
    pub async fn handle_result(
        &self,
        result: DevSessionResult,
        event: Option<&AppEvent>,
    ) -> Result<(), CoordinatorError> {
        match &result {
            DevSessionResult::Updated => {
                self.logger.success("Updated");
                if let Some(event) = event {
                    self.logger
                        .log_action_required_messages(&self.options.store_fqdn, event);
                }
                self.status.set_message(StatusMessage::Updated);
            }
            DevSessionResult::Created => {
                self.status.update_status(StatusUpdate {
                    is_ready: true,
                    preview_url: None,
                });
                self.logger.success("Ready, watching for changes in your app");
                self.status.set_message(StatusMessage::Ready);
            }
            DevSessionResult::Aborted => {
                debug!("session update aborted, superseded by a newer change");
            }
            DevSessionResult::RemoteError(errors) => {
                self.log_errors(errors, event);
                if !errors.is_empty() && errors.iter().all(UserError::is_validation) {
                    self.status.set_message(StatusMessage::ValidationError);
                } else {
                    self.status.set_message(StatusMessage::RemoteError);
                }
            }
            DevSessionResult::UnknownError(message) => {
                let errors = vec![UserError {
                    message: message.clone(),
                    field: None,
                    category: "unknown".into(),
                }];
                self.log_errors(&errors, event);
                self.status.set_message(StatusMessage::RemoteError);
            }
        }

        // A dev loop with no session is useless: if the session was never
        // created, surface that to the caller.
        if !self.status.status().is_ready {
            return Err(CoordinatorError::SessionNeverReady);
        }
        Ok(())
    }

    fn log_errors(&self, errors: &[UserError], event: Option<&AppEvent>) {
        let extensions = event.map(|e| e.app.extensions()).unwrap_or_default();
        self.logger.log_user_errors(errors, &extensions);
    }

    fn classify_pipeline_error(
        &self,
        err: PipelineError,
    ) -> Result<DevSessionResult, CoordinatorError> {
        match err {
            PipelineError::Transport(transport_err) => {
                self.classify_transport_error(transport_err)
            }
            other => Ok(DevSessionResult::UnknownError(other.to_string())),
        }
    }

    /// Error taxonomy for remote failures: raw 401 means the token expired
    /// mid-session; a client error with 401/403 means the auth session
    /// itself is gone; other client errors are unrecoverable; everything
    /// else keeps the session alive as an unknown error.
    fn classify_transport_error(
        &self,
        err: TransportError,
    ) -> Result<DevSessionResult, CoordinatorError> {
        match err {
            TransportError::Http { status: 401 } => Err(CoordinatorError::Unauthenticated),
            TransportError::Client {
                status: status @ (401 | 403),
                ..
            } => {
                debug!(status, "auth session rejected by the platform");
                Err(CoordinatorError::AuthSessionExpired)
            }
            TransportError::Client { status, body } => {
                debug!(status, %body, "platform client error");
                Err(CoordinatorError::Fatal("unknown platform error".into()))
            }
            other => Ok(DevSessionResult::UnknownError(other.to_string())),
        }
    }
}
