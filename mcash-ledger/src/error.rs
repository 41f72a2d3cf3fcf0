//! Error types for the ledger core.

use thiserror::Error;

use crate::roots::MapKind;

/// Error type for transitions, commitment and shadow-store operations.
///
/// Every variant leaves the committed roots untouched; the only variant
/// raised after a commit has landed is [`LedgerError::TransferFailed`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The witness decodes to a key other than `Hash(account)`.
    #[error("witness for the {map} map is not bound to this account")]
    KeyMismatch { map: MapKind },

    /// The recomputed root differs from the committed root.
    #[error("{map} witness does not open against the committed root")]
    StaleWitness { map: MapKind },

    /// Balance and reputation witnesses decode to different keys.
    #[error("balance and reputation witnesses are bound to different keys")]
    CrossMapKeyMismatch,

    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: u64, required: u64 },

    #[error("invalid signature")]
    InvalidSignature,

    /// A positional reputation witness does not open against the committed root.
    #[error("reputation proof does not match the committed root")]
    ProofMismatch,

    #[error("malformed witness: {0}")]
    MalformedWitness(String),

    #[error("proof generation timed out after {timeout_ms} ms")]
    ProofTimeout { timeout_ms: u64 },

    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error("commit rejected: {0}")]
    CommitRejected(String),

    /// Roots were committed and mirrored, but the outbound transfer failed.
    #[error("outbound transfer failed after commit: {0}")]
    TransferFailed(String),

    #[error("ledger roots have not been initialised")]
    NotInitialized,

    #[error("shadow store diverged from the committed roots: {0}")]
    ShadowDivergence(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("sequencer unavailable")]
    SequencerClosed,
}

impl LedgerError {
    /// Whether the caller may resubmit the same request after refetching state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::StaleWitness { .. }
                | LedgerError::ProofTimeout { .. }
                | LedgerError::ProofGenerationFailed(_)
                | LedgerError::CommitRejected(_)
        )
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(err: anyhow::Error) -> Self {
        LedgerError::InvalidInput(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(LedgerError::ProofTimeout { timeout_ms: 10 }.is_retryable());
        assert!(LedgerError::StaleWitness {
            map: MapKind::Settled
        }
        .is_retryable());
        assert!(!LedgerError::InvalidSignature.is_retryable());
        assert!(!LedgerError::KeyMismatch {
            map: MapKind::Unstable
        }
        .is_retryable());
    }
}
