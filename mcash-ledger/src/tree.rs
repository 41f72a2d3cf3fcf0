//! Fixed-height positional Merkle tree.
//!
//! Leaves are addressed by position rather than by key. This is the tree
//! shape accepted by the positional reputation query; it shares the node
//! hash with the sparse map so roots are comparable.

use halo2curves_axiom::bn256::Fr;
use mcash_common::serde_fr;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::map::hash_node;

/// Height of the positional reputation tree, counting the leaf layer.
pub const REPUTATION_TREE_HEIGHT: usize = 8;

/// A fixed-height binary Merkle tree stored as a flat node array.
///
/// Index 1 is the root; the children of node `i` are `2i` and `2i + 1`.
#[derive(Clone, Debug)]
pub struct FixedMerkleTree {
    nodes: Vec<Fr>,
    height: usize,
}

/// Sibling path for one leaf of a [`FixedMerkleTree`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeWitness {
    /// `true` when the path node at that level is the left child.
    pub is_lefts: Vec<bool>,
    #[serde(with = "serde_fr::vec")]
    pub siblings: Vec<Fr>,
}

impl FixedMerkleTree {
    /// An all-zero tree of the given height (leaf layer included).
    pub fn new(height: usize) -> Result<Self, LedgerError> {
        if height == 0 || height > 32 {
            return Err(LedgerError::InvalidInput(format!(
                "tree height must be in 1..=32, got {height}"
            )));
        }
        let leaf_count = 1usize << (height - 1);
        let mut nodes = vec![Fr::zero(); 2 * leaf_count];
        for i in (1..leaf_count).rev() {
            nodes[i] = hash_node(&nodes[2 * i], &nodes[2 * i + 1]);
        }
        Ok(Self { nodes, height })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn leaf_count(&self) -> usize {
        1 << (self.height - 1)
    }

    pub fn root(&self) -> Fr {
        self.nodes[1]
    }

    pub fn get(&self, index: usize) -> Option<Fr> {
        (index < self.leaf_count()).then(|| self.nodes[self.leaf_count() + index])
    }

    /// Overwrite the leaf at `index` and rehash its path.
    pub fn set(&mut self, index: usize, value: Fr) -> Result<Fr, LedgerError> {
        let mut node = self.leaf_node(index)?;
        self.nodes[node] = value;
        while node > 1 {
            node /= 2;
            self.nodes[node] = hash_node(&self.nodes[2 * node], &self.nodes[2 * node + 1]);
        }
        Ok(self.root())
    }

    pub fn witness(&self, index: usize) -> Result<TreeWitness, LedgerError> {
        let mut node = self.leaf_node(index)?;
        let mut is_lefts = Vec::with_capacity(self.height - 1);
        let mut siblings = Vec::with_capacity(self.height - 1);
        while node > 1 {
            is_lefts.push(node % 2 == 0);
            siblings.push(self.nodes[node ^ 1]);
            node /= 2;
        }
        Ok(TreeWitness { is_lefts, siblings })
    }

    fn leaf_node(&self, index: usize) -> Result<usize, LedgerError> {
        if index >= self.leaf_count() {
            return Err(LedgerError::InvalidInput(format!(
                "leaf index {index} out of range for {} leaves",
                self.leaf_count()
            )));
        }
        Ok(self.leaf_count() + index)
    }
}

impl TreeWitness {
    pub fn height(&self) -> usize {
        self.siblings.len() + 1
    }

    pub fn calculate_root(&self, leaf: Fr) -> Result<Fr, LedgerError> {
        self.check_shape()?;
        Ok(self
            .siblings
            .iter()
            .zip(self.is_lefts.iter())
            .fold(leaf, |current, (sibling, &is_left)| {
                if is_left {
                    hash_node(&current, sibling)
                } else {
                    hash_node(sibling, &current)
                }
            }))
    }

    /// Leaf position encoded by the direction bits.
    pub fn calculate_index(&self) -> Result<usize, LedgerError> {
        self.check_shape()?;
        Ok(self
            .is_lefts
            .iter()
            .enumerate()
            .filter(|(_, is_left)| !**is_left)
            .fold(0usize, |index, (level, _)| index | (1 << level)))
    }

    fn check_shape(&self) -> Result<(), LedgerError> {
        if self.is_lefts.len() != self.siblings.len() || self.siblings.len() >= 32 {
            return Err(LedgerError::MalformedWitness(format!(
                "positional witness has {} siblings and {} directions",
                self.siblings.len(),
                self.is_lefts.len()
            )));
        }
        Ok(())
    }
}
