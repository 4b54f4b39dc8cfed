//! FIFO of association chunks with lend/restore semantics.
//!
//! At-least-once download without per-hash bookkeeping: a chunk handed
//! to a channel that dies comes back to the rear of the queue and any
//! channel may pick it up.

use std::{collections::VecDeque, sync::Arc};

use obelisk_archive::Archive;
use obelisk_common::{associations::AssociationMap, Height};

pub struct MapQueue {
    archive: Arc<dyn Archive>,
    /// Chunk size ceiling (`inventory_max`).
    inventory: usize,
    maps: VecDeque<AssociationMap>,
}

impl MapQueue {
    pub fn new(archive: Arc<dyn Archive>, inventory: usize) -> Self {
        Self {
            archive,
            inventory,
            maps: VecDeque::new(),
        }
    }

    /// Scan unassociated candidate headers above `start`, appending
    /// inventory-sized chunks. Returns the number of hashes added.
    pub fn extend_from(&mut self, start: Height) -> usize {
        let mut added = 0;
        let mut start = start;
        loop {
            let map = self.archive.get_unassociated_above(start, self.inventory);
            let Some(top) = map.top_height() else {
                break;
            };
            added += map.len();
            start = top;
            self.maps.push_back(map);
        }
        added
    }

    /// Pop one chunk from the front; an empty chunk means "no work".
    pub fn pop(&mut self) -> AssociationMap {
        self.maps.pop_front().unwrap_or_default()
    }

    /// Restore an unfinished chunk to the back of the queue. Returns
    /// the number of hashes restored.
    pub fn restore(&mut self, map: AssociationMap) -> usize {
        let size = map.len();
        if size != 0 {
            self.maps.push_back(map);
        }
        size
    }

    pub fn clear(&mut self) {
        self.maps.clear();
    }

    pub fn total(&self) -> usize {
        self.maps.iter().map(AssociationMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
