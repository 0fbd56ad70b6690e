use harbor_core::{AppEvent, BuildStatus, Extension, UserError};
use tracing::{debug, error, info, warn};

/// An error message attributed to one extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixedError {
    /// Usually the extension handle.
    pub prefix: String,
    pub message: String,
}

/// Narrow reporting surface the coordinator drives. Formatting and rendering
/// live behind this trait; the coordinator never prints directly.
pub trait SessionLogger: Send + Sync {
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn success(&self, message: &str);
    /// Per-extension diagnostics for one event batch.
    fn log_extension_events(&self, event: &AppEvent);
    /// Structured errors returned by the remote service, attributed to the
    /// app's extensions where possible.
    fn log_user_errors(&self, errors: &[UserError], extensions: &[Extension]);
    fn log_multiple_errors(&self, errors: &[PrefixedError]);
    /// Follow-up steps the developer must take outside the CLI (for example
    /// in the store admin) after an update lands.
    fn log_action_required_messages(&self, store_fqdn: &str, event: &AppEvent);
}

/// Default logger backed by `tracing`. A richer renderer (terminal UI) can
/// replace it without touching the coordinator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSessionLogger;

impl SessionLogger for TracingSessionLogger {
    fn info(&self, message: &str) {
        info!("{message}");
    }

    fn warning(&self, message: &str) {
        warn!("{message}");
    }

    fn success(&self, message: &str) {
        info!("{message}");
    }

    fn log_extension_events(&self, event: &AppEvent) {
        for ext_event in &event.extension_events {
            match ext_event.build_result.status {
                BuildStatus::Ok => {
                    debug!(handle = %ext_event.extension.handle, "extension built");
                }
                BuildStatus::Error => {
                    for diagnostic in &ext_event.build_result.errors {
                        error!(handle = %ext_event.extension.handle, "{diagnostic}");
                    }
                }
            }
        }
    }

    fn log_user_errors(&self, errors: &[UserError], extensions: &[Extension]) {
        for user_error in errors {
            // Attribute the error to an extension when the error's field
            // path mentions a known handle.
            let handle = user_error.field.as_ref().and_then(|field| {
                extensions
                    .iter()
                    .find(|ext| field.iter().any(|part| part == &ext.handle))
                    .map(|ext| ext.handle.clone())
            });
            match handle {
                Some(handle) => error!(%handle, "{}", user_error.message),
                None => error!("{}", user_error.message),
            }
        }
    }

    fn log_multiple_errors(&self, errors: &[PrefixedError]) {
        for err in errors {
            error!(prefix = %err.prefix, "{}", err.message);
        }
    }

    fn log_action_required_messages(&self, store_fqdn: &str, event: &AppEvent) {
        debug!(
            %store_fqdn,
            extensions = event.extension_events.len(),
            "checked for action-required follow-ups"
        );
    }
}
