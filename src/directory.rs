//! The address-ordered block directory.
//!
//! A doubly linked list of [`BlockHandle`]s threaded through the descriptors
//! in the [`SlotArena`]. The anchor is the first block ever created; once
//! set it is never cleared, since the head block has no predecessor to be
//! absorbed into.

use crate::arena::{BlockHandle, SlotArena};

#[derive(Debug)]
pub struct Directory {
    head: Option<BlockHandle>,
}

impl Directory {
    pub const fn new() -> Directory {
        Directory { head: None }
    }

    /// The anchor block, or `None` if nothing has been allocated yet.
    #[inline]
    pub fn head(&self) -> Option<BlockHandle> {
        self.head
    }

    /// Links `new` into the list after `prev`, or installs it as the anchor
    /// when `prev` is `None` (first block ever).
    pub fn append(&mut self, arena: &mut SlotArena, prev: Option<BlockHandle>, new: BlockHandle) {
        match prev {
            Some(prev) => self.link_after(arena, prev, new),
            None => {
                debug_assert!(self.head.is_none(), "anchor is only installed once");
                self.head = Some(new);
            }
        }
    }

    /// Splices `new` in immediately after `prev`, taking over `prev`'s
    /// succeeding link.
    pub fn link_after(&mut self, arena: &mut SlotArena, prev: BlockHandle, new: BlockHandle) {
        let old_next = arena[prev].next;
        {
            let new_block = &mut arena[new];
            new_block.prev = Some(prev);
            new_block.next = old_next;
        }
        if let Some(next) = old_next {
            arena[next].prev = Some(new);
        }
        arena[prev].next = Some(new);
    }

    /// Splices `handle` out, relinking its neighbors directly to each other.
    /// The removed descriptor's own links are left untouched.
    pub fn unlink(&mut self, arena: &mut SlotArena, handle: BlockHandle) {
        let (prev, next) = {
            let block = &arena[handle];
            (block.prev, block.next)
        };
        match prev {
            Some(prev) => arena[prev].next = next,
            None => self.head = next,
        }
        if let Some(next) = next {
            arena[next].prev = prev;
        }
    }

    /// Walks the directory front to back.
    pub fn iter<'a>(&self, arena: &'a SlotArena) -> Blocks<'a> {
        Blocks {
            arena,
            cursor: self.head,
        }
    }
}

pub struct Blocks<'a> {
    arena: &'a SlotArena,
    cursor: Option<BlockHandle>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = (BlockHandle, &'a crate::block::Block);

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.cursor?;
        let block = &self.arena[handle];
        self.cursor = block.next;
        Some((handle, block))
    }
}
