//! Transition functions.
//!
//! Each function is pure: it takes the currently committed roots plus the
//! witnesses and claimed previous values the operator looked up, validates
//! them, and returns a [`TransitionResult`] describing the new roots and the
//! exact map updates the shadow store must mirror once the result commits.

use ed25519_dalek::Signature;
use halo2curves_axiom::bn256::Fr;
use mcash_common::serde_fr;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::identity::{payment_message, verify_fields, AccountId};
use crate::map::MapWitness;
use crate::proof::{PublicInputs, TransitionKind};
use crate::roots::{MapKind, Roots};
use crate::tree::{TreeWitness, REPUTATION_TREE_HEIGHT};

/// Amount staged by one deposit and released by one settlement.
pub const DEPOSIT_UNIT: u64 = 1_000_000;

/// A single write to one of the shadow maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapUpdate {
    pub map: MapKind,
    #[serde(with = "serde_fr")]
    pub key: Fr,
    #[serde(with = "serde_fr")]
    pub value: Fr,
}

impl MapUpdate {
    pub fn new(map: MapKind, key: Fr, value: Fr) -> Self {
        Self { map, key, value }
    }
}

/// Outbound value transfer owed once a payment commits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub destination: AccountId,
    pub amount: u64,
}

/// Everything a transition computed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResult {
    pub kind: TransitionKind,
    pub prior_roots: Option<Roots>,
    pub new_roots: Roots,
    pub updates: Vec<MapUpdate>,
    pub transfer: Option<Transfer>,
}

impl TransitionResult {
    pub fn public_inputs(&self) -> PublicInputs {
        PublicInputs {
            kind: self.kind,
            prior_roots: self.prior_roots,
            new_roots: self.new_roots,
        }
    }
}

/// A claimed previous value together with its membership witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessedValue {
    pub witness: MapWitness,
    pub value: u64,
}

impl WitnessedValue {
    pub fn new(witness: MapWitness, value: u64) -> Self {
        Self { witness, value }
    }
}

/// Inputs to [`make_payment`].
#[derive(Clone, Debug)]
pub struct PaymentInputs {
    pub amount: u64,
    pub sender: AccountId,
    pub destination: AccountId,
    /// Sender's settled balance.
    pub balance: WitnessedValue,
    /// Sender's reputation counter.
    pub reputation: WitnessedValue,
    /// Sender's signature over `payment_message(destination, sender)`.
    pub signature: Signature,
}

/// Check that a witness is bound to `account_key` and opens against the
/// committed root.
fn open_for(
    map: MapKind,
    committed_root: Fr,
    account_key: &Fr,
    opened: &WitnessedValue,
) -> Result<(), LedgerError> {
    let (root, key) = opened
        .witness
        .compute_root_and_key(Fr::from(opened.value))?;
    if key != *account_key {
        return Err(LedgerError::KeyMismatch { map });
    }
    if root != committed_root {
        return Err(LedgerError::StaleWitness { map });
    }
    Ok(())
}

/// The key both witnesses address; they must agree.
fn shared_key(balance: &MapWitness, reputation: &MapWitness) -> Result<Fr, LedgerError> {
    let key = balance.key()?;
    if key != reputation.key()? {
        return Err(LedgerError::CrossMapKeyMismatch);
    }
    Ok(key)
}

fn overflow(what: &str) -> LedgerError {
    LedgerError::InvalidInput(format!("{what} overflows u64"))
}

/// Genesis: commit `roots` with no prior state.
pub fn init_roots(roots: Roots) -> TransitionResult {
    TransitionResult {
        kind: TransitionKind::InitRoots,
        prior_roots: None,
        new_roots: roots,
        updates: Vec::new(),
        transfer: None,
    }
}

/// Stage one [`DEPOSIT_UNIT`] into the account's unstable balance.
pub fn verify_deposit(
    current: &Roots,
    account: &AccountId,
    unstable: &WitnessedValue,
) -> Result<TransitionResult, LedgerError> {
    let key = account.map_key();
    open_for(MapKind::Unstable, current.unstable, &key, unstable)?;

    let staged = unstable
        .value
        .checked_add(DEPOSIT_UNIT)
        .ok_or_else(|| overflow("unstable balance"))?;
    let unstable_root = unstable.witness.compute_root(Fr::from(staged))?;

    Ok(TransitionResult {
        kind: TransitionKind::VerifyDeposit,
        prior_roots: Some(*current),
        new_roots: current.with(MapKind::Unstable, unstable_root),
        updates: vec![MapUpdate::new(MapKind::Unstable, key, Fr::from(staged))],
        transfer: None,
    })
}

/// Move one [`DEPOSIT_UNIT`] from the unstable pool into the settled pool.
pub fn make_deposit(
    current: &Roots,
    account: &AccountId,
    unstable: &WitnessedValue,
    settled: &WitnessedValue,
) -> Result<TransitionResult, LedgerError> {
    let key = account.map_key();
    open_for(MapKind::Unstable, current.unstable, &key, unstable)?;
    open_for(MapKind::Settled, current.settled, &key, settled)?;

    let amount = DEPOSIT_UNIT;
    if unstable.value < amount {
        return Err(LedgerError::InsufficientBalance {
            balance: unstable.value,
            required: amount,
        });
    }
    let unstable_next = unstable.value - amount;
    let settled_next = settled
        .value
        .checked_add(amount)
        .ok_or_else(|| overflow("settled balance"))?;

    let unstable_root = unstable.witness.compute_root(Fr::from(unstable_next))?;
    let settled_root = settled.witness.compute_root(Fr::from(settled_next))?;

    Ok(TransitionResult {
        kind: TransitionKind::MakeDeposit,
        prior_roots: Some(*current),
        new_roots: current
            .with(MapKind::Unstable, unstable_root)
            .with(MapKind::Settled, settled_root),
        updates: vec![
            MapUpdate::new(MapKind::Unstable, key, Fr::from(unstable_next)),
            MapUpdate::new(MapKind::Settled, key, Fr::from(settled_next)),
        ],
        transfer: None,
    })
}

/// Debit the sender, bump their reputation and emit the outbound transfer.
pub fn make_payment(current: &Roots, inputs: &PaymentInputs) -> Result<TransitionResult, LedgerError> {
    if inputs.amount == 0 {
        return Err(LedgerError::InvalidInput(
            "payment amount must be positive".into(),
        ));
    }

    let message = payment_message(&inputs.destination, &inputs.sender);
    verify_fields(&inputs.sender, &[message], &inputs.signature)?;

    let sender_key = inputs.sender.map_key();
    open_for(MapKind::Settled, current.settled, &sender_key, &inputs.balance)?;
    open_for(MapKind::Reputation, current.reputation, &sender_key, &inputs.reputation)?;

    if inputs.balance.value < inputs.amount {
        return Err(LedgerError::InsufficientBalance {
            balance: inputs.balance.value,
            required: inputs.amount,
        });
    }
    let balance_next = inputs.balance.value - inputs.amount;
    let reputation_next = inputs
        .reputation
        .value
        .checked_add(1)
        .ok_or_else(|| overflow("reputation"))?;

    let settled_root = inputs.balance.witness.compute_root(Fr::from(balance_next))?;
    let reputation_root = inputs
        .reputation
        .witness
        .compute_root(Fr::from(reputation_next))?;
    shared_key(&inputs.balance.witness, &inputs.reputation.witness)?;

    Ok(TransitionResult {
        kind: TransitionKind::MakePayment,
        prior_roots: Some(*current),
        new_roots: current
            .with(MapKind::Settled, settled_root)
            .with(MapKind::Reputation, reputation_root),
        updates: vec![
            MapUpdate::new(MapKind::Settled, sender_key, Fr::from(balance_next)),
            MapUpdate::new(MapKind::Reputation, sender_key, Fr::from(reputation_next)),
        ],
        transfer: Some(Transfer {
            destination: inputs.destination,
            amount: inputs.amount,
        }),
    })
}

/// Prove a reputation value against a positional tree root. Read-only.
pub fn get_reputation(
    current: &Roots,
    witness: &TreeWitness,
    reputation: u64,
) -> Result<TransitionResult, LedgerError> {
    if witness.height() != REPUTATION_TREE_HEIGHT {
        return Err(LedgerError::MalformedWitness(format!(
            "expected a height {} witness, got height {}",
            REPUTATION_TREE_HEIGHT,
            witness.height()
        )));
    }
    if witness.calculate_root(Fr::from(reputation))? != current.reputation {
        return Err(LedgerError::ProofMismatch);
    }
    Ok(TransitionResult {
        kind: TransitionKind::GetReputation,
        prior_roots: Some(*current),
        new_roots: *current,
        updates: Vec::new(),
        transfer: None,
    })
}
