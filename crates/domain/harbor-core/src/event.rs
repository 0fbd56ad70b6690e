use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// One extension of the app. The handle is stable for the lifetime of the
/// dev session and is what the remote service and logs key on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub handle: String,
    /// Whether the extension can be previewed through the local proxy.
    pub previewable: bool,
}

impl Extension {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            previewable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Ok,
    Error,
}

/// Outcome of building one extension for the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub status: BuildStatus,
    /// Compiler/bundler diagnostics, only populated on failure.
    pub errors: Vec<String>,
}

impl BuildResult {
    pub fn ok() -> Self {
        Self {
            status: BuildStatus::Ok,
            errors: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: BuildStatus::Error,
            errors: vec![message.into()],
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == BuildStatus::Error
    }
}

#[derive(Debug, Clone)]
pub struct ExtensionEvent {
    pub extension: Extension,
    pub build_result: BuildResult,
}

/// Snapshot of the app taken by the watcher when it coalesced a change-set.
///
/// The coordinator only needs two things from it: the deployment manifest
/// (serialized into the bundle as `manifest.json`) and the extension list
/// (used to compute preview eligibility). Producing the manifest is local and
/// synchronous; the snapshot never reaches for the network.
pub trait AppSnapshot: Send + Sync {
    fn manifest(&self) -> anyhow::Result<serde_json::Value>;
    fn extensions(&self) -> Vec<Extension>;
}

/// One coalesced batch of local changes, emitted by the external watcher.
/// Immutable; consumed once per coordinator reaction.
#[derive(Clone)]
pub struct AppEvent {
    pub app: Arc<dyn AppSnapshot>,
    pub extension_events: Vec<ExtensionEvent>,
    /// When the triggering change was first observed. Only used for latency
    /// logging.
    pub started_at: Instant,
}

impl AppEvent {
    pub fn new(app: Arc<dyn AppSnapshot>, extension_events: Vec<ExtensionEvent>) -> Self {
        Self {
            app,
            extension_events,
            started_at: Instant::now(),
        }
    }

    /// True if any extension in the batch failed to build. Such an event is
    /// never deployable as a whole.
    pub fn has_build_errors(&self) -> bool {
        self.extension_events
            .iter()
            .any(|ev| ev.build_result.is_error())
    }

    pub fn failed_events(&self) -> impl Iterator<Item = &ExtensionEvent> {
        self.extension_events
            .iter()
            .filter(|ev| ev.build_result.is_error())
    }

    /// An event with no extension sub-events (e.g. an app-level reload that
    /// touched no extension) needs no upload.
    pub fn is_empty(&self) -> bool {
        self.extension_events.is_empty()
    }

    /// Preview eligibility over the *whole* app, not just the changed
    /// extensions.
    pub fn any_previewable(&self) -> bool {
        self.app.extensions().iter().any(|ext| ext.previewable)
    }
}

impl fmt::Debug for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppEvent")
            .field("extension_events", &self.extension_events)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
