//! The assembler front-end and its per-compilation context.

use crate::api::{Architecture, Client};
use crate::arch::{
    ceiling, Ppc32, BYTES_PER_WORD, FRAME_FOOTER_SIZE, STACK_REGISTER, THREAD_REGISTER,
};
use crate::block::{Block, BlockData};
use crate::buffer::CodeBuffer;
use crate::encoding::{mflr, mtlr};
use crate::ir::{BinaryOperation, OperandKind, Operation, TernaryOperation, UnaryOperation};
use crate::lower::{self, binary_index, ternary_index, unary_index};
use crate::operand::{Memory, Operand, Reg, RegPair};
use crate::promise::{Promise, PromiseData};
use crate::task::{Listener, Task};
use cranelift_entity::PrimaryMap;
use log::debug;
use std::rc::Rc;

/// Mutable state of one compilation: the code buffer, the block chain, the
/// deferred tasks, the promise arena and the client borrow.
///
/// Lowering routines receive this; the [`Assembler`] front-end owns it.
pub struct Context<'a> {
    pub(crate) code: CodeBuffer,
    pub(crate) blocks: PrimaryMap<Block, BlockData>,
    pub(crate) first_block: Block,
    pub(crate) last_block: Option<Block>,
    pub(crate) tasks: Vec<Task>,
    pub(crate) promises: PrimaryMap<Promise, PromiseData>,
    client: Option<&'a mut dyn Client>,
    result: u64,
}

impl<'a> Context<'a> {
    fn new() -> Self {
        let mut blocks = PrimaryMap::new();
        let first_block = blocks.push(BlockData::new(0));
        Self {
            code: CodeBuffer::with_capacity(1024),
            blocks,
            first_block,
            last_block: Some(first_block),
            tasks: Vec::new(),
            promises: PrimaryMap::new(),
            client: None,
            result: 0,
        }
    }

    pub(crate) fn issue(&mut self, word: u32) {
        self.code.append4(word);
    }

    pub(crate) fn acquire_temp(&mut self) -> Reg {
        self.client
            .as_mut()
            .expect("no client set")
            .acquire_temporary()
    }

    pub(crate) fn release_temp(&mut self, reg: Reg) {
        self.client
            .as_mut()
            .expect("no client set")
            .release_temporary(reg);
    }

    pub(crate) fn resolved(&mut self, value: i64) -> Promise {
        self.promises.push(PromiseData::Resolved(value))
    }

    pub(crate) fn shift_mask(&mut self, base: Promise, shift: u32, mask: u64) -> Promise {
        self.promises
            .push(PromiseData::ShiftMask { base, shift, mask })
    }

    pub(crate) fn offset(&mut self) -> Promise {
        let block = self.last_block.expect("no open block");
        let offset = self.code.length();
        self.promises.push(PromiseData::Offset { block, offset })
    }

    pub(crate) fn promise_resolved(&self, promise: Promise) -> bool {
        match &self.promises[promise] {
            PromiseData::Resolved(_) => true,
            PromiseData::Offset { block, .. } => self.blocks[*block].resolved(),
            PromiseData::ShiftMask { base, .. } => self.promise_resolved(*base),
            PromiseData::Delayed { value, .. } => value.is_some(),
        }
    }

    pub(crate) fn promise_value(&self, promise: Promise) -> i64 {
        match &self.promises[promise] {
            PromiseData::Resolved(value) => *value,
            PromiseData::Offset { block, offset } => {
                let block = &self.blocks[*block];
                assert!(block.resolved(), "offset promise queried before layout");
                i64::from(block.start + (offset - block.offset))
            }
            PromiseData::ShiftMask { base, shift, mask } => {
                (self.promise_value(*base) >> shift) & (*mask as i64)
            }
            PromiseData::Delayed { value, .. } => value.expect("unresolved promise queried"),
        }
    }

    pub(crate) fn listen(&mut self, promise: Promise, listener: Listener) {
        match &mut self.promises[promise] {
            PromiseData::Delayed {
                value: None,
                listeners,
            } => listeners.push(listener),
            _ => panic!("promise cannot accept listeners"),
        }
    }

    pub(crate) fn append_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub(crate) fn append_branch_task(&mut self, target: Promise, conditional: bool) {
        let instruction_offset = self.offset();
        self.append_task(Task::Offset {
            promise: target,
            instruction_offset,
            conditional,
        });
    }

    /// Base address of the output region, once `write_to` has run.
    pub(crate) fn result(&self) -> u64 {
        self.result
    }
}

/// One argument to [`Assembler::push_frame`]: its size in bytes and the
/// operand holding it.
#[derive(Clone, Copy, Debug)]
pub struct FrameArg {
    /// Value size in bytes.
    pub size: u32,
    /// Where the value currently lives.
    pub operand: Operand,
}

fn pad(size: u32) -> u32 {
    ceiling(size, BYTES_PER_WORD) * BYTES_PER_WORD
}

/// The stateful emission surface of one compilation.
///
/// The IR producer feeds operations through the `apply` methods, segments the
/// result with [`end_block`](Self::end_block), assigns each block a final
/// position, and materializes everything with [`write_to`](Self::write_to).
pub struct Assembler<'a> {
    pub(crate) ctx: Context<'a>,
    arch: Rc<Ppc32>,
}

impl<'a> Assembler<'a> {
    /// Create an assembler for the given architecture.
    #[must_use]
    pub fn new(arch: Rc<Ppc32>) -> Self {
        Self {
            ctx: Context::new(),
            arch,
        }
    }

    /// Install the register-allocation client. Required before the first
    /// lowering that needs a scratch register.
    pub fn set_client(&mut self, client: &'a mut dyn Client) {
        assert!(self.ctx.client.is_none(), "client already set");
        self.ctx.client = Some(client);
    }

    /// The architecture this assembler targets.
    #[must_use]
    pub fn arch(&self) -> &dyn Architecture {
        &*self.arch
    }

    /// A promise already carrying `value`.
    pub fn resolved_promise(&mut self, value: i64) -> Promise {
        self.ctx.resolved(value)
    }

    /// A promise whose value the caller supplies later through
    /// [`resolve`](Self::resolve).
    pub fn delayed_promise(&mut self) -> Promise {
        self.ctx.promises.push(PromiseData::delayed())
    }

    /// A promise computing `(base >> shift) & mask` once `base` resolves.
    pub fn shift_mask_promise(&mut self, base: Promise, shift: u32, mask: u64) -> Promise {
        self.ctx.shift_mask(base, shift, mask)
    }

    /// A promise for the current position in the emitted code, resolved once
    /// the containing block is.
    pub fn offset(&mut self) -> Promise {
        self.ctx.offset()
    }

    /// Whether `promise` has a value.
    #[must_use]
    pub fn promise_resolved(&self, promise: Promise) -> bool {
        self.ctx.promise_resolved(promise)
    }

    /// The value of a resolved promise.
    #[must_use]
    pub fn promise_value(&self, promise: Promise) -> i64 {
        self.ctx.promise_value(promise)
    }

    /// Resolve a delayed promise, firing the patch listeners recorded on it
    /// in registration order. Returns the continuation address reported by
    /// the last listener; for a call site this is the address the runtime
    /// treats as the site's return address.
    ///
    /// # Safety
    ///
    /// Code regions patched by listeners on this promise must still be
    /// mapped and writable.
    pub unsafe fn resolve(&mut self, promise: Promise, value: i64) -> Option<u64> {
        let listeners = match &mut self.ctx.promises[promise] {
            PromiseData::Delayed {
                value: slot @ None,
                listeners,
            } => {
                *slot = Some(value);
                core::mem::take(listeners)
            }
            _ => panic!("promise cannot be resolved by the client"),
        };

        let mut continuation = None;
        for listener in &listeners {
            continuation = Some(listener.run(value));
        }
        continuation
    }

    /// Emit a nullary operation.
    pub fn apply(&mut self, op: Operation) {
        let emit = self.arch.dispatch.nullary[op as usize].expect("unsupported operation");
        emit(&mut self.ctx);
    }

    /// Emit a unary operation.
    pub fn apply_unary(&mut self, op: UnaryOperation, a_size: u32, a: &Operand) {
        if let Some(emit) = self.arch.dispatch.unary[unary_index(op, a.kind())] {
            emit(&mut self.ctx, a_size, a);
        } else {
            // No direct lowering for this operand kind: materialize into a
            // register and re-dispatch.
            let tmp = self.force_register(a_size, a);
            let emit = self.arch.dispatch.unary[unary_index(op, OperandKind::Register)]
                .unwrap_or_else(|| panic!("unsupported operation: {op:?}"));
            emit(&mut self.ctx, a_size, &Operand::Register(tmp));
            self.release_pair(tmp);
        }
    }

    /// Emit a binary operation.
    pub fn apply_binary(
        &mut self,
        op: BinaryOperation,
        a_size: u32,
        a: &Operand,
        b_size: u32,
        b: &Operand,
    ) {
        if let Some(emit) = self.arch.dispatch.binary[binary_index(op, a.kind(), b.kind())] {
            emit(&mut self.ctx, a_size, a, b_size, b);
        } else {
            let tmp = self.force_register(a_size, a);
            let emit = self.arch.dispatch.binary
                [binary_index(op, OperandKind::Register, b.kind())]
            .unwrap_or_else(|| panic!("unsupported operand kinds for {op:?}"));
            emit(&mut self.ctx, a_size, &Operand::Register(tmp), b_size, b);
            self.release_pair(tmp);
        }
    }

    /// Emit a ternary operation. The second source and the destination must
    /// be register operands of equal size.
    pub fn apply_ternary(
        &mut self,
        op: TernaryOperation,
        a_size: u32,
        a: &Operand,
        b_size: u32,
        b: &Operand,
        c_size: u32,
        c: &Operand,
    ) {
        assert_eq!(b_size, c_size);
        assert_eq!(b.kind(), OperandKind::Register);
        assert_eq!(c.kind(), OperandKind::Register);

        if let Some(emit) = self.arch.dispatch.ternary[ternary_index(op, a.kind())] {
            emit(&mut self.ctx, b_size, a, b, c);
        } else {
            let tmp = self.force_register(a_size, a);
            let emit = self.arch.dispatch.ternary
                [ternary_index(op, OperandKind::Register)]
            .unwrap_or_else(|| panic!("unsupported operation: {op:?}"));
            emit(&mut self.ctx, b_size, &Operand::Register(tmp), b, c);
            self.release_pair(tmp);
        }
    }

    fn force_register(&mut self, size: u32, operand: &Operand) -> RegPair {
        assert!(
            operand.kind() != OperandKind::Register,
            "unsupported operand kinds"
        );

        let low = self.ctx.acquire_temp();
        let high = if size > BYTES_PER_WORD {
            Some(self.ctx.acquire_temp())
        } else {
            None
        };
        let tmp = RegPair { low, high };

        let emit = self.arch.dispatch.binary
            [binary_index(BinaryOperation::Move, operand.kind(), OperandKind::Register)]
        .unwrap_or_else(|| panic!("no move lowering for {:?} operands", operand.kind()));
        emit(&mut self.ctx, size, operand, size, &Operand::Register(tmp));
        tmp
    }

    fn release_pair(&mut self, pair: RegPair) {
        if let Some(high) = pair.high {
            self.ctx.release_temp(high);
        }
        self.ctx.release_temp(pair.low);
    }

    /// Store the stack pointer into the thread structure for the runtime's
    /// stack walker.
    pub fn save_frame(&mut self, stack_offset: i32) {
        let stack = Operand::Register(RegPair::single(STACK_REGISTER));
        let dst = Operand::Memory(Memory::reg_offset(THREAD_REGISTER, stack_offset));
        lower::move_rm(&mut self.ctx, BYTES_PER_WORD, &stack, BYTES_PER_WORD, &dst);
    }

    /// Allocate an aligned frame sized for `arguments` and place each one per
    /// the calling convention: the first eight in argument registers, the
    /// rest in frame slots above the thread register.
    pub fn push_frame(&mut self, arguments: &[FrameArg]) {
        let footprint: u32 = arguments
            .iter()
            .map(|a| ceiling(a.size, BYTES_PER_WORD))
            .sum();
        self.allocate_frame(self.arch.align_frame_size(footprint));

        let mut offset = 0;
        for (index, argument) in arguments.iter().enumerate() {
            let index = u32::try_from(index).unwrap();
            let dst = if index < self.arch.argument_register_count() {
                Operand::Register(RegPair::single(self.arch.argument_register(index)))
            } else {
                let slot = (offset + FRAME_FOOTER_SIZE) * BYTES_PER_WORD;
                Operand::Memory(Memory::reg_offset(
                    THREAD_REGISTER,
                    i32::try_from(slot).unwrap(),
                ))
            };

            self.apply_binary(
                BinaryOperation::Move,
                argument.size,
                &argument.operand,
                pad(argument.size),
                &dst,
            );

            offset += ceiling(argument.size, BYTES_PER_WORD);
        }
    }

    /// Save the link register into the caller's frame and open a new frame
    /// of `footprint` words; the stack store doubles as the back-chain
    /// write.
    pub fn allocate_frame(&mut self, footprint: u32) {
        let return_address = RegPair::single(Reg::new(0));
        self.ctx.issue(mflr(return_address.low));

        let return_address_dst = Operand::Memory(Memory::reg_offset(STACK_REGISTER, 8));
        lower::move_rm(
            &mut self.ctx,
            BYTES_PER_WORD,
            &Operand::Register(return_address),
            BYTES_PER_WORD,
            &return_address_dst,
        );

        let stack = Operand::Register(RegPair::single(STACK_REGISTER));
        let displacement = -i32::try_from(footprint * BYTES_PER_WORD).unwrap();
        let stack_dst = Operand::Memory(Memory::reg_offset(STACK_REGISTER, displacement));
        lower::move_and_update_rm(&mut self.ctx, BYTES_PER_WORD, &stack, BYTES_PER_WORD, &stack_dst);
    }

    /// Restore the stack pointer and the link register saved by
    /// [`allocate_frame`](Self::allocate_frame).
    pub fn pop_frame(&mut self) {
        let stack = Operand::Register(RegPair::single(STACK_REGISTER));
        let stack_src = Operand::Memory(Memory::reg_offset(STACK_REGISTER, 0));
        lower::move_mr(&mut self.ctx, BYTES_PER_WORD, &stack_src, BYTES_PER_WORD, &stack);

        let return_address = RegPair::single(Reg::new(0));
        let return_address_src = Operand::Memory(Memory::reg_offset(STACK_REGISTER, 8));
        lower::move_mr(
            &mut self.ctx,
            BYTES_PER_WORD,
            &return_address_src,
            BYTES_PER_WORD,
            &Operand::Register(return_address),
        );

        self.ctx.issue(mtlr(return_address.low));
    }

    /// Close the current block. With `start_new` the next emission opens a
    /// fresh block; otherwise emission is finished.
    pub fn end_block(&mut self, start_new: bool) -> Block {
        let block = self.ctx.last_block.expect("no open block");
        let length = self.ctx.code.length();
        let data = &mut self.ctx.blocks[block];
        data.size = length - data.offset;

        self.ctx.last_block = if start_new {
            Some(self.ctx.blocks.push(BlockData::new(length)))
        } else {
            None
        };
        block
    }

    /// Assign `block` its final start position and successor. Returns the
    /// first position past the block.
    pub fn resolve_block(&mut self, block: Block, start: u32, next: Option<Block>) -> u32 {
        let data = &mut self.ctx.blocks[block];
        data.start = start;
        data.next = next;
        start + data.size
    }

    /// Bytes emitted so far.
    #[must_use]
    pub fn length(&self) -> u32 {
        self.ctx.code.length()
    }

    /// Copy each block to its resolved position in `dst`, then run the
    /// deferred patch tasks in reverse insertion order.
    ///
    /// The address of `dst` is taken as the address the code will execute
    /// at; promises carrying absolute targets are patched relative to it.
    pub fn write_to(&mut self, dst: &mut [u8]) {
        self.ctx.result = dst.as_ptr() as u64;

        debug!("writing {} bytes to {:#x}", self.length(), self.ctx.result);

        let mut block = Some(self.ctx.first_block);
        while let Some(id) = block {
            let data = &self.ctx.blocks[id];
            assert!(data.resolved(), "{id} written before layout");
            let (start, offset, size) = (
                data.start as usize,
                data.offset as usize,
                data.size as usize,
            );
            dst[start..start + size].copy_from_slice(&self.ctx.code.data()[offset..offset + size]);
            block = data.next;
        }

        let tasks = core::mem::take(&mut self.ctx.tasks);
        for task in tasks.iter().rev() {
            task.run(&mut self.ctx, dst);
        }
    }
}
