//! Deposit replay protection.

use halo2curves_axiom::bn256::Fr;
use mcash_common::reduce_be_bytes_to_fr;

use crate::error::LedgerError;
use crate::ledger::CommittedTransition;
use crate::roots::MapKind;
use crate::shadow::ShadowStore;
use crate::transition::MapUpdate;

/// Value stored in the nullifier map for a settled deposit.
pub const NULLIFIER_SENTINEL: u64 = 1;

/// Nullifier map key for an external deposit identifier.
pub fn deposit_nullifier(deposit_id: &str) -> Fr {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"mcash_deposit_nullifier_v1");
    hasher.update(deposit_id.as_bytes());
    reduce_be_bytes_to_fr(hasher.finalize().as_bytes())
}

/// The write that marks `nullifier` as used.
pub fn nullifier_update(nullifier: Fr) -> MapUpdate {
    MapUpdate::new(
        MapKind::Nullifier,
        nullifier,
        Fr::from(NULLIFIER_SENTINEL),
    )
}

/// Whether any committed transition in `history` marked `nullifier`.
pub fn committed_in(history: &[CommittedTransition], nullifier: &Fr) -> bool {
    history.iter().any(|entry| {
        entry
            .updates
            .iter()
            .any(|update| update.map == MapKind::Nullifier && update.key == *nullifier)
    })
}

/// Write-once set of consumed identifiers.
pub trait ReplayGuard {
    /// Whether `nullifier` has already been consumed.
    fn check(&self, nullifier: &Fr) -> bool;

    /// Consume `nullifier`. Marking twice is a no-op.
    fn mark(&mut self, nullifier: Fr) -> Result<(), LedgerError>;
}

impl ReplayGuard for ShadowStore {
    fn check(&self, nullifier: &Fr) -> bool {
        self.get(MapKind::Nullifier, nullifier) != Fr::zero()
    }

    fn mark(&mut self, nullifier: Fr) -> Result<(), LedgerError> {
        if self.check(&nullifier) {
            return Ok(());
        }
        self.apply(&[nullifier_update(nullifier)]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_are_write_once() {
        let mut store = ShadowStore::in_memory();
        let id = deposit_nullifier("deposit-1");
        assert!(!store.check(&id));

        store.mark(id).unwrap();
        assert!(store.check(&id));
        store.mark(id).unwrap();
        assert_eq!(
            store.get(MapKind::Nullifier, &id),
            Fr::from(NULLIFIER_SENTINEL)
        );
        assert!(!store.check(&deposit_nullifier("deposit-2")));
    }

    #[test]
    fn deposit_ids_map_to_distinct_keys() {
        assert_ne!(deposit_nullifier("a"), deposit_nullifier("b"));
        assert_eq!(deposit_nullifier("a"), deposit_nullifier("a"));
    }
}
