pub mod archive;
pub mod net;

// Re-exports for convenience
pub use archive::{zip_directory, ArchiveError};
pub use net::{BundleUploader, UploadError};
