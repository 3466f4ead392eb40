//! Dispatch error types.

use sparkscale_client::ClientError;
use sparkscale_types::Epoch;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// One attempt failed in a way that may succeed on retry.
    #[error("epoch {epoch}: transient failure: {source}")]
    Transient { epoch: Epoch, source: ClientError },

    /// The orchestrator rejected the request; retrying will not help.
    #[error("epoch {epoch}: rejected: {source}")]
    Permanent { epoch: Epoch, source: ClientError },

    #[error("epoch {epoch}: gave up after {attempts} attempts: {last}")]
    Exhausted {
        epoch: Epoch,
        attempts: u32,
        last: ClientError,
    },

    #[error("epoch {0} is already being dispatched")]
    DuplicateEpoch(Epoch),

    #[error("epoch {epoch} is not newer than already dispatched epoch {last}")]
    StaleEpoch { epoch: Epoch, last: Epoch },

    #[error("epoch {epoch} refused while epoch {outstanding} is outstanding")]
    Busy { epoch: Epoch, outstanding: Epoch },

    #[error("epoch {epoch}: cancelled by shutdown after {attempts} attempts")]
    Cancelled { epoch: Epoch, attempts: u32 },
}

impl DispatchError {
    /// Classify a single failed attempt.
    pub fn from_attempt(epoch: Epoch, source: ClientError) -> Self {
        if source.is_transient() {
            DispatchError::Transient { epoch, source }
        } else {
            DispatchError::Permanent { epoch, source }
        }
    }

    /// Refused by the in-flight guard or ordering check; nothing was sent.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            DispatchError::DuplicateEpoch(_) | DispatchError::StaleEpoch { .. } | DispatchError::Busy { .. }
        )
    }
}
