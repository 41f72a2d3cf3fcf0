//! Root commitment types.
//!
//! The committed state of the ledger is three field elements, one per
//! committed map. The nullifier map lives only in the shadow store.

use std::fmt;

use halo2curves_axiom::bn256::Fr;
use mcash_common::serde_fr;
use serde::{Deserialize, Serialize};

use crate::map::SparseMerkleMap;

/// The maps maintained by the shadow store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    Unstable,
    Settled,
    Reputation,
    Nullifier,
}

impl MapKind {
    pub const ALL: [MapKind; 4] = [
        MapKind::Unstable,
        MapKind::Settled,
        MapKind::Reputation,
        MapKind::Nullifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MapKind::Unstable => "unstable",
            MapKind::Settled => "settled",
            MapKind::Reputation => "reputation",
            MapKind::Nullifier => "nullifier",
        }
    }

    /// Single-byte tag used as the storage key prefix.
    pub(crate) fn tag(&self) -> u8 {
        match self {
            MapKind::Unstable => 0,
            MapKind::Settled => 1,
            MapKind::Reputation => 2,
            MapKind::Nullifier => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        MapKind::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Whether the map's root is part of the committed state.
    pub fn is_committed(&self) -> bool {
        !matches!(self, MapKind::Nullifier)
    }
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three committed roots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roots {
    #[serde(with = "serde_fr")]
    pub unstable: Fr,
    #[serde(with = "serde_fr")]
    pub settled: Fr,
    #[serde(with = "serde_fr")]
    pub reputation: Fr,
}

impl Roots {
    pub fn new(unstable: Fr, settled: Fr, reputation: Fr) -> Self {
        Self {
            unstable,
            settled,
            reputation,
        }
    }

    /// Roots of three empty maps.
    pub fn empty() -> Self {
        let empty = SparseMerkleMap::empty_root();
        Self::new(empty, empty, empty)
    }

    pub fn get(&self, map: MapKind) -> Option<Fr> {
        match map {
            MapKind::Unstable => Some(self.unstable),
            MapKind::Settled => Some(self.settled),
            MapKind::Reputation => Some(self.reputation),
            MapKind::Nullifier => None,
        }
    }

    /// Return a copy with one committed root replaced.
    pub fn with(mut self, map: MapKind, root: Fr) -> Self {
        match map {
            MapKind::Unstable => self.unstable = root,
            MapKind::Settled => self.settled = root,
            MapKind::Reputation => self.reputation = root,
            MapKind::Nullifier => {}
        }
        self
    }

    pub fn to_fields(&self) -> [Fr; 3] {
        [self.unstable, self.settled, self.reputation]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_tags_round_trip() {
        for kind in MapKind::ALL {
            assert_eq!(MapKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(MapKind::from_tag(9), None);
    }

    #[test]
    fn with_ignores_nullifier_map() {
        let roots = Roots::empty();
        assert_eq!(roots.with(MapKind::Nullifier, Fr::from(7u64)), roots);
        let moved = roots.with(MapKind::Settled, Fr::from(7u64));
        assert_eq!(moved.settled, Fr::from(7u64));
        assert_eq!(moved.unstable, roots.unstable);
    }

    #[test]
    fn roots_serialize_as_hex() {
        let json = serde_json::to_value(Roots::empty()).unwrap();
        assert!(json["settled"].as_str().unwrap().starts_with("0x"));
    }
}
