//! Specialized collection types

pub use slotmap::{new_key_type, Key, SecondaryMap, SlotMap};

/// Number of ids covered by one bitset word
pub const IDS_PER_BLOCK: usize = u64::BITS as usize;

/// Fixed capacity bitset of active ids, 64 ids per word.
///
/// Iteration skips empty words entirely and walks set bits with
/// `trailing_zeros`, so sparse sets over large id ranges stay cheap.
#[derive(Debug, Clone)]
pub struct ActiveIdSet {
    blocks: Vec<u64>,
    capacity: usize,
}

impl ActiveIdSet {
    /// Create an empty set able to hold ids `0..capacity`
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: vec![0; capacity.div_ceil(IDS_PER_BLOCK)],
            capacity,
        }
    }

    /// Highest id + 1 the set can hold
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raw words, lowest ids first
    pub fn blocks(&self) -> &[u64] {
        &self.blocks
    }

    /// Whether `id` is set
    pub fn contains(&self, id: usize) -> bool {
        id < self.capacity && self.blocks[id / IDS_PER_BLOCK] & (1 << (id % IDS_PER_BLOCK)) != 0
    }

    /// Flip the bit for `id`; ids outside the capacity are ignored
    pub fn toggle(&mut self, id: usize) {
        if id < self.capacity {
            self.blocks[id / IDS_PER_BLOCK] ^= 1 << (id % IDS_PER_BLOCK);
        }
    }

    /// Set or clear the bit for `id`
    pub fn set(&mut self, id: usize, active: bool) {
        if self.contains(id) != active {
            self.toggle(id);
        }
    }

    /// Clear every bit
    pub fn clear(&mut self) {
        self.blocks.fill(0);
    }

    /// Number of set ids
    pub fn count(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Iterate set ids in ascending order, scanning no further than `upper_id` inclusive
    pub fn iter_up_to(&self, upper_id: usize) -> impl Iterator<Item = usize> + '_ {
        let last_block = (upper_id / IDS_PER_BLOCK).min(self.blocks.len().saturating_sub(1));
        self.blocks
            .get(..=last_block)
            .unwrap_or(&[])
            .iter()
            .enumerate()
            .filter(|(_, block)| **block != 0)
            .flat_map(|(index, block)| SetBits { bits: *block, base: index * IDS_PER_BLOCK })
    }

    /// Iterate all set ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.iter_up_to(self.capacity.saturating_sub(1))
    }
}

struct SetBits {
    bits: u64,
    base: usize,
}

impl Iterator for SetBits {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.bits == 0 {
            return None;
        }
        let offset = self.bits.trailing_zeros() as usize;
        self.bits &= self.bits - 1;
        Some(self.base + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_sets_expected_word_and_bit() {
        let mut set = ActiveIdSet::new(8191);
        set.toggle(5);
        set.toggle(70);

        assert_eq!(set.blocks()[0], 1 << 5);
        assert_eq!(set.blocks()[1], 1 << 6);
        assert!(set.contains(70));
        assert_eq!(set.count(), 2);

        set.toggle(5);
        assert!(!set.contains(5));
    }

    #[test]
    fn test_iteration_is_ascending_and_bounded() {
        let mut set = ActiveIdSet::new(300);
        for id in [299, 3, 64, 65, 128] {
            set.set(id, true);
        }
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 64, 65, 128, 299]);
        // the bound is by word, ids in the last scanned word are still visited
        assert_eq!(set.iter_up_to(70).collect::<Vec<_>>(), vec![3, 64, 65]);
    }

    #[test]
    fn test_out_of_range_ids_are_ignored() {
        let mut set = ActiveIdSet::new(10);
        set.toggle(10);
        set.toggle(1000);
        assert_eq!(set.count(), 0);
        assert!(!set.contains(1000));
    }
}
