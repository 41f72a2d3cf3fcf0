//! Operator-held shadow copy of the maps.
//!
//! The shadow store keeps the full content of the unstable, settled,
//! reputation and nullifier maps so the operator can hand out witnesses.
//! It is only ever mutated with the update list of a transition the ledger
//! has already accepted.

use std::fs;
use std::path::Path;

use halo2curves_axiom::bn256::Fr;
use mcash_common::{fr_from_bytes, fr_to_bytes, fr_to_u64};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::identity::AccountId;
use crate::map::{MapWitness, SparseMerkleMap};
use crate::roots::{MapKind, Roots};
use crate::transition::{MapUpdate, WitnessedValue};

const ENTRIES_TREE: &str = "entries";

/// Balances and reputation of one account as the shadow store sees them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub account: AccountId,
    pub unstable: u64,
    pub settled: u64,
    pub reputation: u64,
}

#[derive(Default)]
pub struct ShadowStore {
    unstable: SparseMerkleMap,
    settled: SparseMerkleMap,
    reputation: SparseMerkleMap,
    nullifier: SparseMerkleMap,
    storage: Option<Storage>,
}

struct Storage {
    _db: sled::Db,
    entries: sled::Tree,
}

impl ShadowStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) a sled-backed store and load its entries.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    LedgerError::Storage(format!(
                        "failed to create directory for shadow db at {}: {err}",
                        path.display()
                    ))
                })?;
            }
        }
        let db = sled::open(path)?;
        let entries = db.open_tree(ENTRIES_TREE)?;

        let mut store = Self::default();
        for item in entries.iter() {
            let (raw_key, raw_value) = item?;
            let (map, key) = decode_storage_key(&raw_key)?;
            let value = decode_field(&raw_value)?;
            store.map_mut(map).set(&key, value);
        }
        info!(
            path = %path.display(),
            entries = entries.len(),
            "loaded shadow store"
        );
        store.storage = Some(Storage { _db: db, entries });
        Ok(store)
    }

    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    pub fn map(&self, map: MapKind) -> &SparseMerkleMap {
        match map {
            MapKind::Unstable => &self.unstable,
            MapKind::Settled => &self.settled,
            MapKind::Reputation => &self.reputation,
            MapKind::Nullifier => &self.nullifier,
        }
    }

    fn map_mut(&mut self, map: MapKind) -> &mut SparseMerkleMap {
        match map {
            MapKind::Unstable => &mut self.unstable,
            MapKind::Settled => &mut self.settled,
            MapKind::Reputation => &mut self.reputation,
            MapKind::Nullifier => &mut self.nullifier,
        }
    }

    /// Value at `key`, zero if absent.
    pub fn get(&self, map: MapKind, key: &Fr) -> Fr {
        self.map(map).get(key)
    }

    pub fn witness(&self, map: MapKind, key: &Fr) -> MapWitness {
        self.map(map).witness(key)
    }

    /// The account's current value in `map` together with its witness.
    pub fn witnessed(&self, map: MapKind, account: &AccountId) -> Result<WitnessedValue, LedgerError> {
        let key = account.map_key();
        let value = fr_to_u64(&self.get(map, &key)).map_err(|err| {
            LedgerError::ShadowDivergence(format!("{map} entry for {account}: {err}"))
        })?;
        Ok(WitnessedValue::new(self.witness(map, &key), value))
    }

    /// Roots of the three committed maps.
    pub fn roots(&self) -> Roots {
        Roots::new(
            self.unstable.root(),
            self.settled.root(),
            self.reputation.root(),
        )
    }

    pub fn account_view(&self, account: &AccountId) -> Result<AccountView, LedgerError> {
        Ok(AccountView {
            account: *account,
            unstable: self.witnessed(MapKind::Unstable, account)?.value,
            settled: self.witnessed(MapKind::Settled, account)?.value,
            reputation: self.witnessed(MapKind::Reputation, account)?.value,
        })
    }

    /// Mirror an accepted update list. Persisted entries are written as one
    /// batch before the in-memory maps change.
    pub fn apply(&mut self, updates: &[MapUpdate]) -> Result<Roots, LedgerError> {
        if let Some(storage) = &self.storage {
            let mut batch = sled::Batch::default();
            for update in updates {
                let key = storage_key(update.map, &update.key);
                if update.value == Fr::zero() {
                    batch.remove(&key[..]);
                } else {
                    batch.insert(&key[..], &fr_to_bytes(&update.value)[..]);
                }
            }
            storage.entries.apply_batch(batch)?;
        }

        for update in updates {
            self.map_mut(update.map).set(&update.key, update.value);
        }
        debug!(updates = updates.len(), "applied shadow updates");
        Ok(self.roots())
    }

    /// Drop every entry, in memory and on disk.
    pub fn clear(&mut self) -> Result<(), LedgerError> {
        if let Some(storage) = &self.storage {
            storage.entries.clear()?;
        }
        self.unstable = SparseMerkleMap::new();
        self.settled = SparseMerkleMap::new();
        self.reputation = SparseMerkleMap::new();
        self.nullifier = SparseMerkleMap::new();
        Ok(())
    }

    pub fn flush(&self) -> Result<(), LedgerError> {
        if let Some(storage) = &self.storage {
            storage.entries.flush()?;
        }
        Ok(())
    }
}

fn storage_key(map: MapKind, key: &Fr) -> [u8; 33] {
    let mut buf = [0u8; 33];
    buf[0] = map.tag();
    buf[1..].copy_from_slice(&fr_to_bytes(key));
    buf
}

fn decode_storage_key(raw: &[u8]) -> Result<(MapKind, Fr), LedgerError> {
    if raw.len() != 33 {
        return Err(LedgerError::Storage(format!(
            "shadow entry key has {} bytes, expected 33",
            raw.len()
        )));
    }
    let map = MapKind::from_tag(raw[0])
        .ok_or_else(|| LedgerError::Storage(format!("unknown map tag {}", raw[0])))?;
    Ok((map, decode_field(&raw[1..])?))
}

fn decode_field(raw: &[u8]) -> Result<Fr, LedgerError> {
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| LedgerError::Storage(format!("field entry has {} bytes", raw.len())))?;
    fr_from_bytes(&bytes).map_err(|err| LedgerError::Storage(err.to_string()))
}
