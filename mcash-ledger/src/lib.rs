//! Commitment-anchored balance ledger.
//!
//! The authoritative state is three field elements, the roots of sparse
//! Merkle maps holding unstable balances, settled balances and reputation:
//! ```text
//! Roots = { unstable_root, settled_root, reputation_root }
//! key(account) = Poseidon(pk[0..16] || pk[16..32])
//! ```
//!
//! # Transitions
//!
//! - `init_roots`: genesis, commits empty-map roots once
//! - `verify_deposit`: stages `DEPOSIT_UNIT` into the unstable map
//! - `make_deposit`: moves `DEPOSIT_UNIT` from unstable to settled
//! - `make_payment`: signed debit of settled balance, reputation + 1
//! - `get_reputation`: read-only positional reputation query
//!
//! Each transition validates the supplied witness against the committed
//! root, is proved by a [`ProofEngine`], and is admitted by a
//! [`CommitmentLedger`]. The [`Sequencer`] serialises all of this and keeps
//! the operator's [`ShadowStore`] in step with the ledger.

pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod map;
pub mod nullifier;
pub mod proof;
pub mod reconcile;
pub mod roots;
pub mod sequencer;
pub mod shadow;
pub mod transfer;
pub mod transition;
pub mod tree;

pub use config::SequencerConfig;
pub use error::LedgerError;
pub use identity::{payment_message, sign_fields, signature_from_hex, verify_fields, AccountId};
pub use ledger::{
    CommitOutcome, CommitmentLedger, CommittedTransition, InMemoryLedger, RejectReason, Submission,
};
pub use map::{MapWitness, SparseMerkleMap, MAP_DEPTH};
pub use nullifier::{deposit_nullifier, ReplayGuard};
pub use proof::{DigestProofEngine, ProofEngine, PublicInputs, TransitionKind, TransitionProof};
pub use reconcile::{reconcile, ReconcileReport};
pub use roots::{MapKind, Roots};
pub use sequencer::{Receipt, ReceiptStatus, ReputationProof, Sequencer, TransferReceipt};
pub use shadow::{AccountView, ShadowStore};
pub use transfer::{FundsTransfer, TransferLog};
pub use transition::{
    get_reputation, init_roots, make_deposit, make_payment, verify_deposit, MapUpdate,
    PaymentInputs, Transfer, TransitionResult, WitnessedValue, DEPOSIT_UNIT,
};
pub use tree::{FixedMerkleTree, TreeWitness, REPUTATION_TREE_HEIGHT};
