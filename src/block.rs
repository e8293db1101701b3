//! Blocks of emitted code awaiting final placement.

use cranelift_entity::entity_impl;

/// Sentinel for a block whose final start has not been assigned yet.
pub(crate) const UNRESOLVED: u32 = !0;

/// An opaque reference to a run of emitted code.
///
/// Blocks segment the code buffer; each block is later assigned a final start
/// offset in the output region, and deferred patch tasks are computed against
/// those final positions.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

#[derive(Debug)]
pub(crate) struct BlockData {
    /// Where this block's bytes start in the code buffer.
    pub offset: u32,
    /// Final position in the output region; `UNRESOLVED` until assigned.
    pub start: u32,
    /// Byte length, set when the block is closed.
    pub size: u32,
    /// The block laid out immediately after this one, set on resolution.
    pub next: Option<Block>,
}

impl BlockData {
    pub(crate) fn new(offset: u32) -> Self {
        Self {
            offset,
            start: UNRESOLVED,
            size: 0,
            next: None,
        }
    }

    pub(crate) fn resolved(&self) -> bool {
        self.start != UNRESOLVED
    }
}
