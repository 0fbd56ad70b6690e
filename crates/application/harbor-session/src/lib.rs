pub mod coordinator;
pub mod generation;
pub mod logger;
pub mod pipeline;
pub mod retry;
pub mod status;
pub mod transport;

pub use coordinator::{
    CoordinatorError, DevSessionCoordinator, DevSessionOptions, WatcherMessage,
};
pub use generation::{GenerationGuard, Generations};
pub use logger::{PrefixedError, SessionLogger, TracingSessionLogger};
pub use pipeline::{BundleUploadPipeline, PipelineError, PipelineOutcome};
pub use retry::retry_with_recovery;
pub use status::{DevSessionStatusManager, StatusUpdate};
pub use transport::{
    HttpSessionTransport, MutationOutcome, SessionTransport, TransportError, UploadTargetParams,
};
