//! Promises: values knowable now or later.
//!
//! A promise carries an `i64` that may not be known at the time an instruction
//! referring to it is emitted. Emission records a deferred patch task against
//! the promise; when the task runs, a still-unresolved promise gets a listener
//! that performs the patch upon resolution instead.
//!
//! Promises are arena-allocated in the assembler's context and referred to by
//! index, so they are freely copyable into operands and tasks.

use crate::block::Block;
use crate::task::Listener;
use cranelift_entity::entity_impl;
use smallvec::SmallVec;

/// An opaque reference to a promise.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Promise(u32);
entity_impl!(Promise, "promise");

#[derive(Debug)]
pub(crate) enum PromiseData {
    /// A constant, known from the start.
    Resolved(i64),
    /// The final position of a point in the code, known once the containing
    /// block has been assigned its start.
    Offset {
        block: Block,
        /// Offset within the code buffer at creation time.
        offset: u32,
    },
    /// `(value(base) >> shift) & mask`, resolved iff `base` is.
    ShiftMask {
        base: Promise,
        shift: u32,
        mask: u64,
    },
    /// A value supplied by the client at some later point. The only promise
    /// kind that accepts listeners.
    Delayed {
        value: Option<i64>,
        listeners: SmallVec<[Listener; 2]>,
    },
}

impl PromiseData {
    pub(crate) fn delayed() -> Self {
        PromiseData::Delayed {
            value: None,
            listeners: SmallVec::new(),
        }
    }
}
