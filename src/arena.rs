//! Generational slot arena backing the block directory.
//!
//! Descriptors are addressed by [`BlockHandle`]s instead of raw pointers.
//! Each slot keeps a generation counter that is bumped when its block is
//! removed (absorbed by coalescing), so a handle to a dead block goes stale
//! and lookups through it fail instead of aliasing the slot's next tenant.

use std::ops::{Index, IndexMut};

use crate::block::Block;

/// Stable reference to a block descriptor in the [`SlotArena`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockHandle {
    index: u32,
    generation: u32,
}

impl BlockHandle {
    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> BlockHandle {
        BlockHandle { index, generation }
    }

    #[inline]
    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot {
    generation: u32,
    entry: Entry,
}

enum Entry {
    Vacant { next_vacant: Option<u32> },
    Occupied(Block),
}

/// Arena of block descriptors with stable, generation-checked handles.
pub struct SlotArena {
    slots: Vec<Slot>,
    vacant_head: Option<u32>,
    occupied: usize,
}

impl SlotArena {
    pub const fn new() -> SlotArena {
        SlotArena {
            slots: Vec::new(),
            vacant_head: None,
            occupied: 0,
        }
    }

    /// Number of live block descriptors.
    #[inline]
    pub fn len(&self) -> usize {
        self.occupied
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Stores `block` in a vacant slot, reusing retired slots first.
    pub fn insert(&mut self, block: Block) -> BlockHandle {
        self.occupied += 1;
        match self.vacant_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                self.vacant_head = match &slot.entry {
                    Entry::Vacant { next_vacant } => *next_vacant,
                    Entry::Occupied(_) => unreachable!("vacant list points at an occupied slot"),
                };
                slot.entry = Entry::Occupied(block);
                BlockHandle::new(index, slot.generation)
            }
            None => {
                let index =
                    u32::try_from(self.slots.len()).expect("block arena index space exhausted");
                self.slots.push(Slot {
                    generation: 0,
                    entry: Entry::Occupied(block),
                });
                BlockHandle::new(index, 0)
            }
        }
    }

    /// Retires the slot behind `handle`, returning its block. The slot's
    /// generation is bumped so existing copies of `handle` go stale.
    /// Returns `None` if the handle is already stale.
    pub fn remove(&mut self, handle: BlockHandle) -> Option<Block> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation || matches!(slot.entry, Entry::Vacant { .. }) {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        let entry = std::mem::replace(
            &mut slot.entry,
            Entry::Vacant {
                next_vacant: self.vacant_head,
            },
        );
        self.vacant_head = Some(handle.index);
        self.occupied -= 1;
        match entry {
            Entry::Occupied(block) => Some(block),
            Entry::Vacant { .. } => unreachable!(),
        }
    }

    pub fn get(&self, handle: BlockHandle) -> Option<&Block> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => match &slot.entry {
                Entry::Occupied(block) => Some(block),
                Entry::Vacant { .. } => None,
            },
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: BlockHandle) -> Option<&mut Block> {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => match &mut slot.entry {
                Entry::Occupied(block) => Some(block),
                Entry::Vacant { .. } => None,
            },
            _ => None,
        }
    }
}

impl Index<BlockHandle> for SlotArena {
    type Output = Block;

    fn index(&self, handle: BlockHandle) -> &Block {
        self.get(handle).expect("stale block handle")
    }
}

impl IndexMut<BlockHandle> for SlotArena {
    fn index_mut(&mut self, handle: BlockHandle) -> &mut Block {
        self.get_mut(handle).expect("stale block handle")
    }
}
