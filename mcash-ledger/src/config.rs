//! Sequencer configuration.

use std::time::Duration;

/// Tuning knobs for the [`Sequencer`](crate::sequencer::Sequencer).
#[derive(Clone, Debug)]
pub struct SequencerConfig {
    /// Upper bound on a single proof generation.
    pub proof_timeout: Duration,
    /// Re-witness and resubmit this many times after a stale-roots rejection.
    pub max_commit_retries: u32,
    /// Pending requests buffered before callers wait.
    pub queue_capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            proof_timeout: Duration::from_millis(30_000),
            max_commit_retries: 3,
            queue_capacity: 1024,
        }
    }
}
