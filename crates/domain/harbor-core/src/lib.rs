pub mod event;
pub mod status;
pub mod wire;

pub use event::{AppEvent, AppSnapshot, BuildResult, BuildStatus, Extension, ExtensionEvent};
pub use status::{SessionStatus, StatusMessage};
pub use wire::{DevSessionPayload, DevSessionResult, UserError};
