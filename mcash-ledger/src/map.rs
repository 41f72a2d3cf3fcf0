//! Sparse commitment map.
//!
//! A key→value map laid out over a binary hash tree whose depth equals the
//! bit width of the field, so every field element addresses its own leaf.
//! Leaves hold the raw value (absent keys read as zero) and only non-empty
//! nodes are stored; everything else falls back to the precomputed
//! empty-subtree hashes.

use std::collections::{BTreeMap, HashMap};

use blake3::Hasher;
use halo2curves_axiom::bn256::Fr;
use mcash_common::{fr_from_bits, fr_to_bytes, reduce_be_bytes_to_fr, serde_fr, FIELD_BITS};
use num_bigint::BigUint;
use num_traits::Zero;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Number of levels between a leaf and the root.
pub const MAP_DEPTH: usize = FIELD_BITS;

static EMPTY_SUBTREES: Lazy<Vec<Fr>> = Lazy::new(|| {
    let mut nodes = Vec::with_capacity(MAP_DEPTH + 1);
    nodes.push(Fr::zero());
    for level in 0..MAP_DEPTH {
        let child = nodes[level];
        nodes.push(hash_node(&child, &child));
    }
    nodes
});

/// Root of an empty subtree whose leaves sit `level` levels below it.
pub(crate) fn empty_subtree(level: usize) -> Fr {
    EMPTY_SUBTREES[level]
}

/// Compress two children into their parent node.
pub(crate) fn hash_node(left: &Fr, right: &Fr) -> Fr {
    let mut hasher = Hasher::new();
    hasher.update(b"mcash_map_node_v1");
    hasher.update(&fr_to_bytes(left));
    hasher.update(&fr_to_bytes(right));
    reduce_be_bytes_to_fr(hasher.finalize().as_bytes())
}

/// Membership witness: the sibling path from a leaf up to the root.
///
/// `is_lefts[i]` is true when the path node at level `i` is a left child.
/// The key is not stored; it is re-derived from the direction bits, which is
/// what lets transitions bind a witness to an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapWitness {
    pub is_lefts: Vec<bool>,
    #[serde(with = "serde_fr::vec")]
    pub siblings: Vec<Fr>,
}

impl MapWitness {
    /// Recompute `(root, key)` for `value` placed at the witnessed leaf.
    pub fn compute_root_and_key(&self, value: Fr) -> Result<(Fr, Fr), LedgerError> {
        let root = self.compute_root(value)?;
        let key = self.key()?;
        Ok((root, key))
    }

    pub fn compute_root(&self, value: Fr) -> Result<Fr, LedgerError> {
        self.check_shape()?;
        let root = self
            .siblings
            .iter()
            .zip(self.is_lefts.iter())
            .fold(value, |current, (sibling, &is_left)| {
                if is_left {
                    hash_node(&current, sibling)
                } else {
                    hash_node(sibling, &current)
                }
            });
        Ok(root)
    }

    /// The key addressed by this witness.
    pub fn key(&self) -> Result<Fr, LedgerError> {
        self.check_shape()?;
        let bits: Vec<bool> = self.is_lefts.iter().map(|is_left| !is_left).collect();
        fr_from_bits(&bits).map_err(|err| LedgerError::MalformedWitness(err.to_string()))
    }

    fn check_shape(&self) -> Result<(), LedgerError> {
        if self.siblings.len() != MAP_DEPTH || self.is_lefts.len() != MAP_DEPTH {
            return Err(LedgerError::MalformedWitness(format!(
                "expected {} levels, got {} siblings and {} directions",
                MAP_DEPTH,
                self.siblings.len(),
                self.is_lefts.len()
            )));
        }
        Ok(())
    }
}

/// Fully materialised sparse Merkle map.
#[derive(Clone, Debug, Default)]
pub struct SparseMerkleMap {
    /// Non-zero leaves keyed by the canonical key encoding.
    leaves: BTreeMap<[u8; 32], (Fr, Fr)>,
    /// Non-empty nodes keyed by (level, index at that level).
    nodes: HashMap<(usize, BigUint), Fr>,
}

impl SparseMerkleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root of a map with no entries.
    pub fn empty_root() -> Fr {
        empty_subtree(MAP_DEPTH)
    }

    pub fn root(&self) -> Fr {
        self.node(MAP_DEPTH, &BigUint::zero())
    }

    /// Value stored at `key`, zero if absent.
    pub fn get(&self, key: &Fr) -> Fr {
        self.leaves
            .get(&fr_to_bytes(key))
            .map(|(_, value)| *value)
            .unwrap_or_else(Fr::zero)
    }

    /// Store `value` at `key` and return the new root. Zero removes the entry.
    pub fn set(&mut self, key: &Fr, value: Fr) -> Fr {
        if value == Fr::zero() {
            self.leaves.remove(&fr_to_bytes(key));
        } else {
            self.leaves.insert(fr_to_bytes(key), (*key, value));
        }

        let mut index = leaf_index(key);
        let mut current = value;
        self.put(0, index.clone(), current);

        for level in 0..MAP_DEPTH {
            let sibling = self.node(level, &sibling_index(&index));
            current = if index.bit(0) {
                hash_node(&sibling, &current)
            } else {
                hash_node(&current, &sibling)
            };
            index >>= 1u32;
            self.put(level + 1, index.clone(), current);
        }

        current
    }

    /// Produce the membership witness for `key` under the current root.
    pub fn witness(&self, key: &Fr) -> MapWitness {
        let mut index = leaf_index(key);
        let mut is_lefts = Vec::with_capacity(MAP_DEPTH);
        let mut siblings = Vec::with_capacity(MAP_DEPTH);

        for level in 0..MAP_DEPTH {
            is_lefts.push(!index.bit(0));
            siblings.push(self.node(level, &sibling_index(&index)));
            index >>= 1u32;
        }

        MapWitness { is_lefts, siblings }
    }

    /// Number of non-zero entries.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Non-zero entries in canonical key order.
    pub fn entries(&self) -> impl Iterator<Item = (Fr, Fr)> + '_ {
        self.leaves.values().copied()
    }

    fn node(&self, level: usize, index: &BigUint) -> Fr {
        self.nodes
            .get(&(level, index.clone()))
            .copied()
            .unwrap_or_else(|| empty_subtree(level))
    }

    fn put(&mut self, level: usize, index: BigUint, node: Fr) {
        if node == empty_subtree(level) {
            self.nodes.remove(&(level, index));
        } else {
            self.nodes.insert((level, index), node);
        }
    }
}

fn leaf_index(key: &Fr) -> BigUint {
    BigUint::from_bytes_le(&fr_to_bytes(key))
}

fn sibling_index(index: &BigUint) -> BigUint {
    if index.bit(0) {
        index.clone() - 1u32
    } else {
        index.clone() + 1u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcash_common::poseidon_hash;

    fn key(n: u64) -> Fr {
        poseidon_hash(&[Fr::from(n)])
    }

    #[test]
    fn empty_map_has_empty_root() {
        let map = SparseMerkleMap::new();
        assert_eq!(map.root(), SparseMerkleMap::empty_root());
        assert_eq!(map.get(&key(1)), Fr::zero());
    }

    #[test]
    fn witness_round_trip() {
        let mut map = SparseMerkleMap::new();
        let k = key(1);
        let root = map.set(&k, Fr::from(100u64));
        assert_eq!(root, map.root());

        let witness = map.witness(&k);
        let (computed_root, computed_key) = witness.compute_root_and_key(Fr::from(100u64)).unwrap();
        assert_eq!(computed_root, root);
        assert_eq!(computed_key, k);

        // Moving the value through the same witness predicts the next root.
        let predicted = witness.compute_root(Fr::from(250u64)).unwrap();
        assert_ne!(predicted, root);
        assert_eq!(map.set(&k, Fr::from(250u64)), predicted);
        assert_eq!(
            map.witness(&k).compute_root(Fr::from(250u64)).unwrap(),
            map.root()
        );
    }

    #[test]
    fn witness_for_absent_key_opens_zero() {
        let mut map = SparseMerkleMap::new();
        map.set(&key(1), Fr::from(5u64));
        let witness = map.witness(&key(2));
        assert_eq!(witness.compute_root(Fr::zero()).unwrap(), map.root());
        assert_eq!(witness.key().unwrap(), key(2));
    }

    #[test]
    fn witnesses_track_neighbouring_updates() {
        let mut map = SparseMerkleMap::new();
        map.set(&key(1), Fr::from(1u64));
        map.set(&key(2), Fr::from(2u64));
        map.set(&key(3), Fr::from(3u64));

        for n in 1..=3u64 {
            let witness = map.witness(&key(n));
            assert_eq!(witness.compute_root(Fr::from(n)).unwrap(), map.root());
        }
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn zeroing_an_entry_restores_previous_root() {
        let mut map = SparseMerkleMap::new();
        map.set(&key(1), Fr::from(9u64));
        let before = map.root();
        map.set(&key(2), Fr::from(4u64));
        map.set(&key(2), Fr::zero());
        assert_eq!(map.root(), before);
        assert_eq!(map.len(), 1);
        assert_eq!(map.nodes.len(), MAP_DEPTH + 1);
    }

    #[test]
    fn truncated_witness_is_rejected() {
        let map = SparseMerkleMap::new();
        let mut witness = map.witness(&key(1));
        witness.siblings.pop();
        assert!(matches!(
            witness.compute_root(Fr::zero()),
            Err(LedgerError::MalformedWitness(_))
        ));
    }
}
