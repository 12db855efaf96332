use thiserror::Error;

/// Why a write could not be accepted by the gateway.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The durable queue could not record the write. Treat as data loss.
    #[error("local queue storage failed: {0:#}")]
    Storage(anyhow::Error),
    /// The write was attempted online and the remote rejected it.
    #[error("remote write failed: {0:#}")]
    Remote(anyhow::Error),
}

impl SubmitError {
    pub fn is_storage(&self) -> bool {
        matches!(self, SubmitError::Storage(_))
    }

    pub fn into_inner(self) -> anyhow::Error {
        match self {
            SubmitError::Storage(err) | SubmitError::Remote(err) => err,
        }
    }
}
