//! Types passed to the queue repository.

use crate::model::MutationStatus;

/// Partial update merged into an existing queue row. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPatch {
    pub status: Option<MutationStatus>,
    pub last_error: Option<String>,
    pub retry_count: Option<i64>,
}

impl MutationPatch {
    /// Patch recording a failed replay attempt.
    pub fn failed(error: impl Into<String>, retry_count: i64) -> Self {
        Self {
            status: Some(MutationStatus::Failed),
            last_error: Some(error.into()),
            retry_count: Some(retry_count),
        }
    }

    pub fn status(status: MutationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.last_error.is_none() && self.retry_count.is_none()
    }
}
