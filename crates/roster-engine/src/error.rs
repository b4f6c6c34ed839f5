//! Error types for the roster engine.

use thiserror::Error;

/// Boxed error from the remote store transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The remote tabular store rejected or failed a call.
    #[error("remote store error: {0}")]
    Remote(#[source] BoxError),

    /// The write serializer is no longer running.
    #[error("sync writer unavailable: {0}")]
    WriterClosed(String),
}

impl EngineError {
    pub(crate) fn remote<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Remote(Box::new(err))
    }
}
