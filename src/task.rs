//! Deferred patching of symbolic references.
//!
//! Emission often refers to addresses that are unknown until the whole buffer
//! has been laid out, or later still. Each such site appends a [`Task`]; tasks
//! run after the blocks have been copied to their final positions. A task
//! whose promise is already resolved patches immediately; otherwise it leaves
//! a [`Listener`] on the promise to patch when the value arrives.

use crate::arch::BYTES_PER_WORD;
use crate::asm::Context;
use crate::buffer::{read_word, write_word};
use crate::encoding::{lis, ori};
use crate::operand::Reg;
use crate::promise::Promise;
use log::debug;

/// A deferred patch action.
#[derive(Debug)]
pub(crate) enum Task {
    /// Patch the displacement field of a branch once the target is known.
    Offset {
        /// The branch target.
        promise: Promise,
        /// Final position of the branch instruction itself.
        instruction_offset: Promise,
        /// Conditional branches carry a 16-bit field, unconditional 26-bit.
        conditional: bool,
    },
    /// Patch a two-instruction immediate load once the value is known.
    Immediate {
        promise: Promise,
        /// Final position of the first instruction of the sequence.
        offset: Promise,
        size: u32,
        /// Byte distance from the sequence to the point the runtime treats as
        /// the site's address, reported back on late resolution.
        promise_offset: u32,
    },
}

impl Task {
    pub(crate) fn run(&self, c: &mut Context, dst: &mut [u8]) {
        match *self {
            Task::Offset {
                promise,
                instruction_offset,
                conditional,
            } => {
                let at = usize::try_from(c.promise_value(instruction_offset)).unwrap();
                let instruction = c.result() + at as u64;
                if c.promise_resolved(promise) {
                    let word = read_word(dst, at);
                    let target = c.promise_value(promise);
                    write_word(dst, at, update_offset(word, instruction, conditional, target));
                } else {
                    debug!("deferring branch patch at {instruction:#x}");
                    c.listen(
                        promise,
                        Listener::Branch {
                            instruction,
                            conditional,
                        },
                    );
                }
            }
            Task::Immediate {
                promise,
                offset,
                size,
                promise_offset,
            } => {
                let at = usize::try_from(c.promise_value(offset)).unwrap();
                if c.promise_resolved(promise) {
                    let value = c.promise_value(promise);
                    let words = [read_word(dst, at), read_word(dst, at + 4)];
                    let patched = update_immediate(words, value, size);
                    write_word(dst, at, patched[0]);
                    write_word(dst, at + 4, patched[1]);
                } else {
                    let address = c.result() + at as u64;
                    debug!("deferring immediate patch at {address:#x}");
                    c.listen(
                        promise,
                        Listener::Immediate {
                            address,
                            size,
                            promise_offset,
                        },
                    );
                }
            }
        }
    }
}

/// A patch action left on an unresolved promise.
#[derive(Debug)]
pub(crate) enum Listener {
    Branch {
        /// Absolute address of the branch instruction.
        instruction: u64,
        conditional: bool,
    },
    Immediate {
        /// Absolute address of the first instruction of the load sequence.
        address: u64,
        size: u32,
        promise_offset: u32,
    },
}

impl Listener {
    /// Patch the recorded site with the resolved `value` and return the
    /// continuation address just past it.
    ///
    /// # Safety
    ///
    /// The code region the listener was recorded against must still be mapped
    /// and writable.
    pub(crate) unsafe fn run(&self, value: i64) -> u64 {
        match *self {
            Listener::Branch {
                instruction,
                conditional,
            } => {
                let code = core::slice::from_raw_parts_mut(instruction as *mut u8, 4);
                let word = read_word(code, 0);
                write_word(code, 0, update_offset(word, instruction, conditional, value));
                instruction + 4
            }
            Listener::Immediate {
                address,
                size,
                promise_offset,
            } => {
                let code = core::slice::from_raw_parts_mut(address as *mut u8, 8);
                let words = [read_word(code, 0), read_word(code, 4)];
                let patched = update_immediate(words, value, size);
                write_word(code, 0, patched[0]);
                write_word(code, 4, patched[1]);
                address + u64::from(promise_offset)
            }
        }
    }
}

/// Whether `v` keeps its value when confined to the bit-field that discards
/// the top `left` and bottom `right` bits.
fn bounded(right: u32, left: u32, v: i32) -> bool {
    ((v << left) >> left) == v && ((v >> right) << right) == v
}

/// Rewrite the displacement field of the branch `word` located at
/// `instruction` so it reaches `target`. Bits outside the field are kept.
///
/// # Panics
///
/// Panics when the displacement does not fit the field; callers with
/// statically unbounded ranges must emit the long form instead.
pub(crate) fn update_offset(word: u32, instruction: u64, conditional: bool, target: i64) -> u32 {
    let v64 = target.wrapping_sub(instruction as i64);
    let v = i32::try_from(v64).unwrap_or_else(|_| {
        panic!("branch displacement {v64:#x} out of range");
    });

    let mask = if conditional {
        assert!(
            bounded(2, 16, v),
            "conditional branch displacement {v:#x} out of range"
        );
        0xFFFC
    } else {
        assert!(bounded(2, 6, v), "branch displacement {v:#x} out of range");
        0x03FF_FFFC
    };

    (v as u32 & mask) | (word & !mask)
}

/// Rewrite a two-instruction immediate load (`lis` then `ori`) with a new
/// value, preserving the destination register already encoded in the
/// sequence.
pub(crate) fn update_immediate(words: [u32; 2], value: i64, size: u32) -> [u32; 2] {
    assert_eq!(size, BYTES_PER_WORD, "unsupported immediate size: {size}");

    let r = Reg::new(((words[1] >> 21) & 31) as u8);
    let v = value as i32;
    [lis(r, v >> 16), ori(r, r, v as u32)]
}
