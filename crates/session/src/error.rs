//! Upload session error types.

use chunkup_transfer::TransferError;

use crate::client::ClientError;
use crate::types::SessionState;

/// Errors produced by [`SessionController`](crate::SessionController)
/// operations.
///
/// `NoFileSelected` and `InvalidState` leave the session untouched; every
/// other variant moves it to [`SessionState::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no file selected")]
    NoFileSelected,

    #[error("hashing failed: {0}")]
    Hashing(String),

    #[error("verification failed: {0}")]
    Verification(#[source] ClientError),

    #[error("chunk {index} failed: {reason}")]
    Transfer { index: usize, reason: String },

    #[error("merge failed: {0}")]
    Merge(#[source] ClientError),

    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },

    #[error("file error: {0}")]
    Io(#[from] TransferError),
}

impl UploadError {
    /// Whether the error moved the session to `Failed`.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            UploadError::NoFileSelected | UploadError::InvalidState { .. }
        )
    }
}
