//! Commitment ledger boundary and its in-memory implementation.
//!
//! The ledger holds the committed roots and an append-only history of every
//! accepted transition. New roots are only admitted through
//! [`CommitmentLedger::commit`], which checks the proof and the claimed prior
//! roots before anything is written.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::proof::{ProofEngine, PublicInputs, TransitionKind, TransitionProof};
use crate::roots::Roots;
use crate::transition::{MapUpdate, TransitionResult};

/// A proved transition offered to the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub inputs: PublicInputs,
    pub proof: TransitionProof,
    /// Map writes recorded in the commit history alongside the new roots.
    pub updates: Vec<MapUpdate>,
}

impl Submission {
    pub fn new(result: &TransitionResult, proof: TransitionProof) -> Self {
        Self {
            inputs: result.public_inputs(),
            proof,
            updates: result.updates.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The claimed prior roots are not the committed roots.
    StaleRoots,
    InvalidProof,
    AlreadyInitialized,
    NotInitialized,
    /// Read-only queries never replace roots.
    ReadOnly,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RejectReason::StaleRoots => "prior roots are stale",
            RejectReason::InvalidProof => "proof failed verification",
            RejectReason::AlreadyInitialized => "roots already initialised",
            RejectReason::NotInitialized => "roots not initialised",
            RejectReason::ReadOnly => "read-only transition cannot be committed",
        };
        f.write_str(reason)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitOutcome {
    Accepted { sequence: u64 },
    Rejected { reason: RejectReason },
}

/// One entry of the ledger's append-only history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedTransition {
    pub sequence: u64,
    pub kind: TransitionKind,
    pub prior_roots: Option<Roots>,
    pub new_roots: Roots,
    pub updates: Vec<MapUpdate>,
}

/// The verifiable, append-only ledger the roots are anchored on.
pub trait CommitmentLedger: Send + Sync {
    /// Committed roots, `None` before genesis.
    fn roots(&self) -> Option<Roots>;

    fn commit(&self, submission: &Submission) -> CommitOutcome;

    /// Every accepted transition, oldest first.
    fn history(&self) -> Vec<CommittedTransition>;
}

/// A transition whose proof and prior roots have been checked.
///
/// Only the ledger can construct one, so [`RootCommitment::commit`] has no
/// unchecked path.
pub struct VerifiedTransition {
    new_roots: Roots,
}

/// The three committed roots.
#[derive(Clone, Copy, Debug, Default)]
pub struct RootCommitment {
    roots: Option<Roots>,
}

impl RootCommitment {
    pub fn read(&self) -> Option<Roots> {
        self.roots
    }

    pub fn commit(&mut self, transition: VerifiedTransition) {
        self.roots = Some(transition.new_roots);
    }
}

struct LedgerInner {
    commitment: RootCommitment,
    history: Vec<CommittedTransition>,
}

/// Process-local ledger that checks proofs with a [`ProofEngine`].
pub struct InMemoryLedger {
    verifier: Arc<dyn ProofEngine>,
    inner: Mutex<LedgerInner>,
}

impl InMemoryLedger {
    pub fn new(verifier: Arc<dyn ProofEngine>) -> Self {
        Self {
            verifier,
            inner: Mutex::new(LedgerInner {
                commitment: RootCommitment::default(),
                history: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, current: Option<Roots>, submission: &Submission) -> Result<(), RejectReason> {
        let inputs = &submission.inputs;
        if !inputs.kind.mutates_roots() {
            return Err(RejectReason::ReadOnly);
        }
        if !self.verifier.verify(&submission.proof, inputs) {
            return Err(RejectReason::InvalidProof);
        }
        match (current, inputs.prior_roots) {
            (None, None) => Ok(()),
            (Some(_), None) => Err(RejectReason::AlreadyInitialized),
            (None, Some(_)) => Err(RejectReason::NotInitialized),
            (Some(committed), Some(prior)) if committed == prior => Ok(()),
            (Some(_), Some(_)) => Err(RejectReason::StaleRoots),
        }
    }
}

impl CommitmentLedger for InMemoryLedger {
    fn roots(&self) -> Option<Roots> {
        self.lock().commitment.read()
    }

    fn commit(&self, submission: &Submission) -> CommitOutcome {
        let mut inner = self.lock();
        if let Err(reason) = self.check(inner.commitment.read(), submission) {
            warn!(
                kind = %submission.inputs.kind,
                %reason,
                "ledger rejected submission"
            );
            return CommitOutcome::Rejected { reason };
        }

        let inputs = submission.inputs;
        inner.commitment.commit(VerifiedTransition {
            new_roots: inputs.new_roots,
        });
        let sequence = inner.history.len() as u64;
        inner.history.push(CommittedTransition {
            sequence,
            kind: inputs.kind,
            prior_roots: inputs.prior_roots,
            new_roots: inputs.new_roots,
            updates: submission.updates.clone(),
        });

        info!(
            kind = %inputs.kind,
            sequence,
            unstable = %mcash_common::fr_to_hex(&inputs.new_roots.unstable),
            settled = %mcash_common::fr_to_hex(&inputs.new_roots.settled),
            reputation = %mcash_common::fr_to_hex(&inputs.new_roots.reputation),
            "committed roots"
        );
        CommitOutcome::Accepted { sequence }
    }

    fn history(&self) -> Vec<CommittedTransition> {
        self.lock().history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::DigestProofEngine;
    use crate::roots::MapKind;
    use crate::transition::init_roots;
    use halo2curves_axiom::bn256::Fr;

    fn ledger() -> (Arc<DigestProofEngine>, InMemoryLedger) {
        let engine = Arc::new(DigestProofEngine::new());
        (engine.clone(), InMemoryLedger::new(engine))
    }

    fn submission(engine: &DigestProofEngine, inputs: PublicInputs) -> Submission {
        Submission {
            inputs,
            proof: engine.prove(&inputs).unwrap(),
            updates: Vec::new(),
        }
    }

    fn genesis(engine: &DigestProofEngine, ledger: &InMemoryLedger) {
        let result = init_roots(Roots::empty());
        let sub = submission(engine, result.public_inputs());
        assert_eq!(ledger.commit(&sub), CommitOutcome::Accepted { sequence: 0 });
    }

    #[test]
    fn genesis_is_accepted_once() {
        let (engine, ledger) = ledger();
        assert_eq!(ledger.roots(), None);
        genesis(&engine, &ledger);
        assert_eq!(ledger.roots(), Some(Roots::empty()));

        let again = submission(&engine, init_roots(Roots::empty()).public_inputs());
        assert_eq!(
            ledger.commit(&again),
            CommitOutcome::Rejected {
                reason: RejectReason::AlreadyInitialized
            }
        );
    }

    #[test]
    fn stale_prior_roots_are_rejected() {
        let (engine, ledger) = ledger();
        genesis(&engine, &ledger);

        let first = PublicInputs {
            kind: TransitionKind::VerifyDeposit,
            prior_roots: Some(Roots::empty()),
            new_roots: Roots::empty().with(MapKind::Unstable, Fr::from(1u64)),
        };
        let competing = PublicInputs {
            new_roots: Roots::empty().with(MapKind::Unstable, Fr::from(2u64)),
            ..first
        };
        assert!(matches!(
            ledger.commit(&submission(&engine, first)),
            CommitOutcome::Accepted { sequence: 1 }
        ));
        assert_eq!(
            ledger.commit(&submission(&engine, competing)),
            CommitOutcome::Rejected {
                reason: RejectReason::StaleRoots
            }
        );
        assert_eq!(ledger.roots(), Some(first.new_roots));
        assert_eq!(ledger.history().len(), 2);
    }

    #[test]
    fn forged_proof_is_rejected() {
        let (engine, ledger) = ledger();
        genesis(&engine, &ledger);
        let inputs = PublicInputs {
            kind: TransitionKind::MakeDeposit,
            prior_roots: Some(Roots::empty()),
            new_roots: Roots::empty().with(MapKind::Settled, Fr::from(5u64)),
        };
        let mut forged = submission(&engine, inputs);
        forged.proof.bytes[0] ^= 1;
        assert_eq!(
            ledger.commit(&forged),
            CommitOutcome::Rejected {
                reason: RejectReason::InvalidProof
            }
        );
        assert_eq!(ledger.roots(), Some(Roots::empty()));
    }

    #[test]
    fn commits_before_genesis_are_rejected() {
        let (engine, ledger) = ledger();
        let inputs = PublicInputs {
            kind: TransitionKind::VerifyDeposit,
            prior_roots: Some(Roots::empty()),
            new_roots: Roots::empty(),
        };
        assert_eq!(
            ledger.commit(&submission(&engine, inputs)),
            CommitOutcome::Rejected {
                reason: RejectReason::NotInitialized
            }
        );
    }
}
