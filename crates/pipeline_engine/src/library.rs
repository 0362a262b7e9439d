use async_trait::async_trait;
use pipeline_core::Job;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("library update failed: {0}")]
pub struct LibraryError(pub String);

/// Receives a note for every chapter that finished downloading.
#[async_trait]
pub trait LibraryNotifier: Send + Sync {
    async fn chapter_downloaded(&self, job: &Job) -> Result<(), LibraryError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLibrary;

#[async_trait]
impl LibraryNotifier for NoopLibrary {
    async fn chapter_downloaded(&self, _job: &Job) -> Result<(), LibraryError> {
        Ok(())
    }
}
