//! The organizer's tree: admitted entries not yet on the archived
//! candidate chain (weak branches and not-yet-current headers).

use std::{collections::HashMap, sync::Arc};

use obelisk_common::{chain::ChainEntry, chain_state::ChainState, Hash};

/// One admitted entry with the chain state derived for it.
pub struct TreeNode<E> {
    pub entry: Arc<E>,
    pub state: Arc<ChainState>,
}

/// Hash-keyed set of admitted-but-not-archived entries.
///
/// Ancestors are found by repeated `previous_hash` lookup; every chain
/// of parents ends at another tree entry or an archived header.
pub struct Tree<E> {
    nodes: HashMap<Hash, TreeNode<E>>,
}

impl<E: ChainEntry> Tree<E> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&TreeNode<E>> {
        self.nodes.get(hash)
    }

    pub fn insert(&mut self, entry: Arc<E>, state: Arc<ChainState>) {
        self.nodes.insert(entry.entry_hash(), TreeNode { entry, state });
    }

    /// Remove and return a node, typically to promote it into the archive.
    pub fn extract(&mut self, hash: &Hash) -> Option<TreeNode<E>> {
        self.nodes.remove(hash)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<E: ChainEntry> Default for Tree<E> {
    fn default() -> Self {
        Self::new()
    }
}
