//! A PowerPC-32 assembler back-end for JIT compilation.
//!
//! The IR producer hands this crate architecture-neutral operations over
//! abstract operands (registers, constants, memory references, code
//! addresses); the assembler lowers each one into native 32-bit instruction
//! words through per-(operation, operand kind) dispatch tables. References to
//! addresses that are not known at emission time are carried by promises:
//! emission leaves a placeholder and records a task, and the task patches the
//! exact bit-fields once the buffer has been laid out into blocks, or later
//! still through a listener when the value arrives after the code has been
//! written out.
//!
//! ```
//! use assembler_ppc32::{Assembler, BinaryOperation, Client, Operand, Ppc32, Reg, RegPair};
//!
//! // A toy register allocator handing out callee-saved registers.
//! struct Temporaries(Vec<Reg>);
//! impl Client for Temporaries {
//!     fn acquire_temporary(&mut self) -> Reg {
//!         self.0.pop().unwrap()
//!     }
//!     fn release_temporary(&mut self, reg: Reg) {
//!         self.0.push(reg);
//!     }
//! }
//!
//! let mut temporaries = Temporaries(vec![Reg::new(31), Reg::new(30)]);
//! let mut asm = Assembler::new(Ppc32::new());
//! asm.set_client(&mut temporaries);
//!
//! // r3 = 42
//! let value = asm.resolved_promise(42);
//! asm.apply_binary(
//!     BinaryOperation::Move,
//!     4,
//!     &Operand::Constant(value),
//!     4,
//!     &Operand::Register(RegPair::single(Reg::new(3))),
//! );
//!
//! let block = asm.end_block(false);
//! asm.resolve_block(block, 0, None);
//!
//! let mut code = vec![0; asm.length() as usize];
//! asm.write_to(&mut code);
//! assert_eq!(code, [0x38, 0x60, 0x00, 0x2A]); // li r3, 42
//! ```

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

mod api;
mod arch;
mod asm;
mod block;
mod buffer;
mod encoding;
mod ir;
mod lower;
mod operand;
mod promise;
mod task;

pub use api::{Architecture, BinaryPlan, Client, OperandMask, TernaryPlan, UnaryPlan};
pub use arch::Ppc32;
pub use asm::{Assembler, FrameArg};
pub use block::Block;
pub use ir::{BinaryOperation, OperandKind, Operation, TernaryOperation, UnaryOperation};
pub use operand::{Memory, Operand, Reg, RegPair};
pub use promise::Promise;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
