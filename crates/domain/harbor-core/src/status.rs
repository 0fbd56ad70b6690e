/// The human-visible phase of the dev session. Held by the status manager;
/// only the coordinator drives transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMessage {
    Loading,
    ChangeDetected,
    BuildError,
    Ready,
    Updated,
    RemoteError,
    ValidationError,
}

impl StatusMessage {
    pub fn message(self) -> &'static str {
        match self {
            Self::Loading => "Preparing dev session",
            Self::ChangeDetected => "Change detected, updating dev session",
            Self::BuildError => "Build error. Please review your code and try again",
            Self::Ready => "Ready, watching for changes in your app",
            Self::Updated => "Updated",
            Self::RemoteError => "Error while updating dev session",
            Self::ValidationError => "Validation error in your app configuration",
        }
    }
}

/// Snapshot of the session state. `is_ready` flips to true once the remote
/// session exists and never reverts; it decides whether the next remote call
/// is a create or an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub is_ready: bool,
    pub preview_url: Option<String>,
    pub message: StatusMessage,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            is_ready: false,
            preview_url: None,
            message: StatusMessage::Loading,
        }
    }
}
