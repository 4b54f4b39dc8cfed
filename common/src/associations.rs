//! Header-to-block association tracking.
//!
//! An [`AssociationMap`] is one chunk of headers whose blocks are not
//! yet associated with stored transactions: the unit of download work
//! handed to a peer channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Context, Hash, HeaderLink, Height};

/// One header awaiting its block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub link: HeaderLink,
    pub height: Height,
    pub context: Context,
}

/// An ordered chunk of unassociated headers, keyed by hash.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationMap {
    entries: BTreeMap<Hash, Association>,
}

impl AssociationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hash: Hash, association: Association) {
        self.entries.insert(hash, association);
    }

    pub fn get(&self, hash: &Hash) -> Option<&Association> {
        self.entries.get(hash)
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<Association> {
        self.entries.remove(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest height in the chunk; the scan cursor for the next chunk.
    pub fn top_height(&self) -> Option<Height> {
        self.entries.values().map(|a| a.height).max()
    }

    /// Entries in ascending height order, for in-order requests.
    pub fn by_height(&self) -> Vec<(Hash, Association)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(h, a)| (*h, *a)).collect();
        entries.sort_by_key(|(_, a)| a.height);
        entries
    }

    /// Split off the upper-height half, leaving the lower half here.
    /// Used when the session redistributes a slow channel's work.
    pub fn split_half(&mut self) -> AssociationMap {
        let entries = self.by_height();
        let keep = entries.len().div_ceil(2);
        let mut upper = AssociationMap::new();
        for (hash, association) in entries.into_iter().skip(keep) {
            self.entries.remove(&hash);
            upper.insert(hash, association);
        }
        upper
    }

    /// Merge another chunk into this one.
    pub fn absorb(&mut self, other: AssociationMap) {
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> Hash {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        Hash::new(bytes)
    }

    fn association(height: Height) -> Association {
        Association {
            link: HeaderLink(height),
            height,
            context: Context::default(),
        }
    }

    fn map_of(heights: &[Height]) -> AssociationMap {
        let mut map = AssociationMap::new();
        for &h in heights {
            map.insert(hash(h as u8), association(h));
        }
        map
    }

    #[test]
    fn tracks_membership_and_top() {
        let mut map = map_of(&[5, 7, 6]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.top_height(), Some(7));
        assert!(map.contains(&hash(5)));

        assert_eq!(map.remove(&hash(7)).unwrap().height, 7);
        assert_eq!(map.top_height(), Some(6));
        assert!(!map.contains(&hash(7)));
    }

    #[test]
    fn orders_by_height() {
        let map = map_of(&[9, 3, 6]);
        let heights: Vec<Height> = map.by_height().iter().map(|(_, a)| a.height).collect();
        assert_eq!(heights, vec![3, 6, 9]);
    }

    #[test]
    fn split_keeps_lower_half() {
        let mut map = map_of(&[1, 2, 3, 4]);
        let upper = map.split_half();
        assert_eq!(map.len(), 2);
        assert_eq!(upper.len(), 2);
        assert_eq!(map.top_height(), Some(2));
        assert_eq!(upper.top_height(), Some(4));

        // Odd sizes keep the extra entry locally.
        let mut odd = map_of(&[1, 2, 3, 4, 5]);
        let upper = odd.split_half();
        assert_eq!(odd.len(), 3);
        assert_eq!(upper.len(), 2);
    }
}
