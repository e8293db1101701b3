//! Lowering of IR operations to native instruction sequences.
//!
//! One routine exists per supported (operation, operand kinds) combination;
//! the dispatch tables at the bottom of this module map the combination to
//! its routine. Routines may acquire scratch registers from the client,
//! recurse into peer routines with rewritten operands, and append deferred
//! patch tasks for values that are not known yet.

use crate::arch::BYTES_PER_WORD;
use crate::asm::Context;
use crate::encoding::*;
use crate::ir::{BinaryOperation, OperandKind, Operation, TernaryOperation, UnaryOperation};
use crate::operand::{Memory, Operand, Reg, RegPair};
use crate::promise::Promise;
use crate::task::{update_offset, Task};

pub(crate) type NullaryEmit = fn(&mut Context);
pub(crate) type UnaryEmit = fn(&mut Context, u32, &Operand);
pub(crate) type BinaryEmit = fn(&mut Context, u32, &Operand, u32, &Operand);
pub(crate) type TernaryEmit = fn(&mut Context, u32, &Operand, &Operand, &Operand);

fn reg(r: Reg) -> Operand {
    Operand::Register(RegPair::single(r))
}

fn pair(p: RegPair) -> Operand {
    Operand::Register(p)
}

// Moves.

fn swap_rr(c: &mut Context, a_size: u32, a: RegPair, b_size: u32, b: RegPair) {
    assert_eq!(a_size, BYTES_PER_WORD);
    assert_eq!(b_size, BYTES_PER_WORD);

    let tmp = RegPair::single(c.acquire_temp());
    move_rr(c, a_size, &pair(a), b_size, &pair(tmp));
    move_rr(c, b_size, &pair(b), a_size, &pair(a));
    move_rr(c, b_size, &pair(tmp), b_size, &pair(b));
    c.release_temp(tmp.low);
}

fn move_rr(c: &mut Context, src_size: u32, a: &Operand, dst_size: u32, b: &Operand) {
    let (src, dst) = (a.register(), b.register());
    match src_size {
        1 => c.issue(extsb(dst.low, src.low)),
        2 => c.issue(extsh(dst.low, src.low)),
        4 | 8 => {
            if src_size == 4 && dst_size == 8 {
                move_rr(c, 4, a, 4, b);
                c.issue(srawi(dst.high(), src.low, 31));
            } else if src_size == 8 && dst_size == 8 {
                // Move the halves in an order that survives aliasing between
                // the pairs; a full swap needs a temporary.
                if src.high() == dst.low {
                    if src.low == dst.high() {
                        swap_rr(c, 4, src, 4, dst);
                    } else {
                        move_rr(c, 4, &reg(src.high()), 4, &reg(dst.high()));
                        move_rr(c, 4, a, 4, b);
                    }
                } else {
                    move_rr(c, 4, a, 4, b);
                    move_rr(c, 4, &reg(src.high()), 4, &reg(dst.high()));
                }
            } else if src.low != dst.low {
                c.issue(mr(dst.low, src.low));
            }
        }
        _ => panic!("unsupported move size: {src_size}"),
    }
}

fn move_zrr(c: &mut Context, src_size: u32, a: &Operand, _dst_size: u32, b: &Operand) {
    let (src, dst) = (a.register(), b.register());
    match src_size {
        2 => c.issue(andi(dst.low, src.low, 0xFFFF)),
        _ => panic!("unsupported zero-extending move size: {src_size}"),
    }
}

/// Materialize a constant into a register.
///
/// An unresolved constant always takes the two-instruction form so the words
/// can be patched later; `promise_offset` records how far past the sequence
/// the runtime considers the site's address to be.
fn move_cr2(
    c: &mut Context,
    _src_size: u32,
    src: Promise,
    dst_size: u32,
    dst: RegPair,
    promise_offset: u32,
) {
    assert!(
        dst_size <= BYTES_PER_WORD,
        "unsupported constant move size: {dst_size}"
    );

    if c.promise_resolved(src) {
        let v = c.promise_value(src) as i32;
        if is_int16(i64::from(v)) {
            c.issue(li(dst.low, v));
        } else {
            c.issue(lis(dst.low, v >> 16));
            c.issue(ori(dst.low, dst.low, v as u32));
        }
    } else {
        let offset = c.offset();
        c.append_task(Task::Immediate {
            promise: src,
            offset,
            size: BYTES_PER_WORD,
            promise_offset,
        });
        c.issue(lis(dst.low, 0));
        c.issue(ori(dst.low, dst.low, 0));
    }
}

fn move_cr(c: &mut Context, src_size: u32, a: &Operand, dst_size: u32, b: &Operand) {
    move_cr2(c, src_size, a.constant(), dst_size, b.register(), 0);
}

fn move_cm(c: &mut Context, src_size: u32, a: &Operand, dst_size: u32, b: &Operand) {
    let (src, dst) = (a.constant(), b.memory());
    match dst_size {
        8 => {
            let src_high = c.shift_mask(src, 32, 0xFFFF_FFFF);
            let src_low = c.shift_mask(src, 0, 0xFFFF_FFFF);
            let dst_low = Memory {
                offset: dst.offset + 4,
                ..dst
            };
            move_cm(c, 4, &Operand::Constant(src_low), 4, &Operand::Memory(dst_low));
            move_cm(c, 4, &Operand::Constant(src_high), 4, b);
        }
        _ => {
            let tmp = RegPair::single(c.acquire_temp());
            move_cr2(c, src_size, src, dst_size, tmp, 0);
            store(c, dst_size, tmp, dst.base, dst.offset, dst.index, dst.scale, true);
            c.release_temp(tmp.low);
        }
    }
}

/// Rewrite a scaled-and-offset index into a single register holding
/// `index * scale + offset`, acquiring a temporary when the caller needs the
/// original index preserved.
fn normalize(
    c: &mut Context,
    offset: i32,
    index: Reg,
    scale: u32,
    preserve_index: &mut bool,
) -> (Reg, bool) {
    if offset == 0 && scale == 1 {
        return (index, false);
    }

    debug_assert!(scale.is_power_of_two());

    let normalized = if *preserve_index {
        c.acquire_temp()
    } else {
        index
    };
    let release = *preserve_index;
    *preserve_index = false;

    let scaled = if scale == 1 {
        index
    } else {
        let shift = c.resolved(i64::from(scale.trailing_zeros()));
        shift_left_c(
            c,
            BYTES_PER_WORD,
            &Operand::Constant(shift),
            &reg(index),
            &reg(normalized),
        );
        normalized
    };

    if offset != 0 {
        let offset = c.resolved(i64::from(offset));
        add_c(
            c,
            BYTES_PER_WORD,
            &Operand::Constant(offset),
            &reg(scaled),
            &reg(normalized),
        );
    }

    (normalized, release)
}

fn store(
    c: &mut Context,
    size: u32,
    src: RegPair,
    base: Reg,
    offset: i32,
    index: Option<Reg>,
    scale: u32,
    mut preserve_index: bool,
) {
    if let Some(index) = index {
        let (normalized, release) = normalize(c, offset, index, scale, &mut preserve_index);

        match size {
            1 => c.issue(stbx(src.low, base, normalized)),
            2 => c.issue(sthx(src.low, base, normalized)),
            4 => c.issue(stwx(src.low, base, normalized)),
            8 => {
                let high = RegPair::single(src.high());
                store(c, 4, high, base, 0, Some(normalized), 1, preserve_index);
                store(c, 4, src, base, 4, Some(normalized), 1, preserve_index);
            }
            _ => panic!("unsupported store size: {size}"),
        }

        if release {
            c.release_temp(normalized);
        }
    } else {
        match size {
            1 => c.issue(stb(src.low, base, offset)),
            2 => c.issue(sth(src.low, base, offset)),
            4 => c.issue(stw(src.low, base, offset)),
            8 => {
                let high = RegPair::single(src.high());
                store(c, 4, high, base, offset, None, 1, false);
                store(c, 4, src, base, offset + 4, None, 1, false);
            }
            _ => panic!("unsupported store size: {size}"),
        }
    }
}

pub(crate) fn move_rm(c: &mut Context, src_size: u32, a: &Operand, dst_size: u32, b: &Operand) {
    assert_eq!(src_size, dst_size);

    let (src, dst) = (a.register(), b.memory());
    store(c, src_size, src, dst.base, dst.offset, dst.index, dst.scale, true);
}

/// Store the stack register and update it with the effective address, in one
/// instruction; the write establishes the frame back-chain.
pub(crate) fn move_and_update_rm(
    c: &mut Context,
    src_size: u32,
    a: &Operand,
    dst_size: u32,
    b: &Operand,
) {
    assert_eq!(src_size, BYTES_PER_WORD);
    assert_eq!(dst_size, BYTES_PER_WORD);

    let (src, dst) = (a.register(), b.memory());
    assert!(dst.index.is_none());

    c.issue(stwu(src.low, dst.base, dst.offset));
}

#[allow(clippy::too_many_arguments)]
fn load(
    c: &mut Context,
    src_size: u32,
    base: Reg,
    offset: i32,
    index: Option<Reg>,
    scale: u32,
    dst_size: u32,
    dst: RegPair,
    mut preserve_index: bool,
    sign_extend: bool,
) {
    if let Some(index) = index {
        let (normalized, release) = normalize(c, offset, index, scale, &mut preserve_index);

        match src_size {
            1 => {
                c.issue(lbzx(dst.low, base, normalized));
                if sign_extend {
                    c.issue(extsb(dst.low, dst.low));
                }
            }
            2 => {
                if sign_extend {
                    c.issue(lhax(dst.low, base, normalized));
                } else {
                    c.issue(lhzx(dst.low, base, normalized));
                }
            }
            4 | 8 => {
                if src_size == 4 && dst_size == 8 {
                    load(c, 4, base, 0, Some(normalized), 1, 4, dst, preserve_index, false);
                    move_rr(c, 4, &pair(dst), 8, &pair(dst));
                } else if src_size == 8 && dst_size == 8 {
                    let high = RegPair::single(dst.high());
                    load(c, 4, base, 0, Some(normalized), 1, 4, high, preserve_index, false);
                    load(c, 4, base, 4, Some(normalized), 1, 4, dst, preserve_index, false);
                } else {
                    c.issue(lwzx(dst.low, base, normalized));
                }
            }
            _ => panic!("unsupported load size: {src_size}"),
        }

        if release {
            c.release_temp(normalized);
        }
    } else {
        match src_size {
            1 => {
                c.issue(lbz(dst.low, base, offset));
                if sign_extend {
                    c.issue(extsb(dst.low, dst.low));
                }
            }
            2 => {
                if sign_extend {
                    c.issue(lha(dst.low, base, offset));
                } else {
                    c.issue(lhz(dst.low, base, offset));
                }
            }
            4 | 8 => {
                if src_size == 4 && dst_size == 8 {
                    load(c, 4, base, offset, None, 1, 4, dst, false, false);
                    move_rr(c, 4, &pair(dst), 8, &pair(dst));
                } else if src_size == 8 && dst_size == 8 {
                    let high = RegPair::single(dst.high());
                    load(c, 4, base, offset, None, 1, 4, high, false, false);
                    load(c, 4, base, offset + 4, None, 1, 4, dst, false, false);
                } else {
                    c.issue(lwz(dst.low, base, offset));
                }
            }
            _ => panic!("unsupported load size: {src_size}"),
        }
    }
}

pub(crate) fn move_mr(c: &mut Context, src_size: u32, a: &Operand, dst_size: u32, b: &Operand) {
    let (src, dst) = (a.memory(), b.register());
    load(
        c, src_size, src.base, src.offset, src.index, src.scale, dst_size, dst, true, true,
    );
}

fn move_zmr(c: &mut Context, src_size: u32, a: &Operand, dst_size: u32, b: &Operand) {
    let (src, dst) = (a.memory(), b.register());
    load(
        c, src_size, src.base, src.offset, src.index, src.scale, dst_size, dst, true, false,
    );
}

fn move_ar(c: &mut Context, src_size: u32, a: &Operand, dst_size: u32, b: &Operand) {
    assert!(src_size == BYTES_PER_WORD && dst_size == BYTES_PER_WORD);

    let (src, dst) = (a.address(), b.register());
    move_cr2(c, src_size, src, dst_size, dst, 0);
    load(c, dst_size, dst.low, 0, None, 1, dst_size, dst, true, true);
}

// Arithmetic.

fn add_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let (a, b, t) = (a.register(), b.register(), t.register());
    if size == 8 {
        c.issue(addc(t.low, a.low, b.low));
        c.issue(adde(t.high(), a.high(), b.high()));
    } else {
        c.issue(add(t.low, a.low, b.low));
    }
}

fn add_c(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    let (a, br, tr) = (a.constant(), b.register(), t.register());
    let i = c.promise_value(a) as i32;
    if i == 0 {
        move_rr(c, size, b, size, t);
    } else {
        c.issue(addi(tr.low, br.low, lo16(i)));
        if !is_int16(i64::from(i)) {
            // The low half is sign-extended by the hardware; compensate in
            // the high half.
            c.issue(addis(tr.low, tr.low, hi16(i) + carry16(i)));
        }
    }
}

fn sub_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let (a, b, t) = (a.register(), b.register(), t.register());
    if size == 8 {
        c.issue(subfc(t.low, a.low, b.low));
        c.issue(subfe(t.high(), a.high(), b.high()));
    } else {
        c.issue(subf(t.low, a.low, b.low));
    }
}

fn sub_c(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    let negated = {
        let v = c.promise_value(a.constant());
        c.resolved(-v)
    };
    add_c(c, size, &Operand::Constant(negated), b, t);
}

fn multiply_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let (a, b, t) = (a.register(), b.register(), t.register());
    if size == 8 {
        // t.high = a.high * b.low + a.low * b.high + high(a.low * b.low),
        // t.low = a.low * b.low. Work in temporaries when the destination
        // aliases an input.
        let use_temporaries = b.low == t.low;
        let (tmp_low, tmp_high) = if use_temporaries {
            (c.acquire_temp(), c.acquire_temp())
        } else {
            (t.low, t.high())
        };

        c.issue(mullw(tmp_high, a.high(), b.low));
        c.issue(mullw(tmp_low, a.low, b.high()));
        c.issue(add(t.high(), tmp_high, tmp_low));
        c.issue(mulhwu(tmp_low, a.low, b.low));
        c.issue(add(t.high(), t.high(), tmp_low));
        c.issue(mullw(t.low, a.low, b.low));

        if use_temporaries {
            c.release_temp(tmp_low);
            c.release_temp(tmp_high);
        }
    } else {
        c.issue(mullw(t.low, a.low, b.low));
    }
}

fn divide_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    assert_eq!(size, 4);

    let (a, b, t) = (a.register(), b.register(), t.register());
    c.issue(divw(t.low, b.low, a.low));
}

fn remainder_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let (br, tr) = (b.register(), t.register());
    let use_temporary = br.low == tr.low;
    let tmp = if use_temporary {
        c.acquire_temp()
    } else {
        tr.low
    };
    let tmp = pair(RegPair::single(tmp));

    divide_r(c, size, a, b, &tmp);
    multiply_r(c, size, a, &tmp, &tmp);
    sub_r(c, size, &tmp, b, t);

    if use_temporary {
        c.release_temp(tmp.register().low);
    }
}

// Shifts.

fn shift_left_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let (a, b, t) = (a.register(), b.register(), t.register());
    if size == 8 {
        let tmp_low = c.acquire_temp();
        let tmp_high = c.acquire_temp();
        c.issue(subfic(tmp_high, a.low, 32));
        c.issue(slw(t.high(), b.high(), a.low));
        c.issue(srw(tmp_low, b.low, tmp_high));
        c.issue(or(t.high(), t.high(), tmp_low));
        c.issue(addi(tmp_high, a.low, -32));
        c.issue(slw(tmp_low, b.low, tmp_high));
        c.issue(or(t.high(), t.high(), tmp_low));
        c.release_temp(tmp_high);
        c.release_temp(tmp_low);
    }
    c.issue(slw(t.low, b.low, a.low));
}

fn shift_left_c(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let sh = c.promise_value(a.constant());
    let (b, t) = (b.register(), t.register());
    if size == 8 {
        if sh < 32 {
            let sh = sh as u32;
            c.issue(rlwinm(t.high(), b.high(), sh, 0, 31 - sh));
            c.issue(rlwimi(t.high(), b.low, sh, 32 - sh, 31));
            c.issue(slwi(t.low, b.low, sh));
        } else {
            c.issue(rlwinm(t.high(), b.low, (sh - 32) as u32, 0, (63 - sh) as u32));
            c.issue(li(t.low, 0));
        }
    } else {
        c.issue(slwi(t.low, b.low, sh as u32));
    }
}

fn shift_right_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let (a, b, t) = (a.register(), b.register(), t.register());
    if size == 8 {
        let tmp_low = c.acquire_temp();
        let tmp_high = c.acquire_temp();
        c.issue(subfic(tmp_high, a.low, 32));
        c.issue(srw(t.low, b.low, a.low));
        c.issue(slw(tmp_low, b.high(), tmp_high));
        c.issue(or(t.low, t.low, tmp_low));
        c.issue(addic(tmp_high, a.low, -32));
        c.issue(sraw(tmp_low, b.high(), tmp_high));
        // Skip the copy unless the shift count was 32 or more.
        c.issue(ble(8));
        c.issue(ori(t.low, tmp_low, 0));
        c.issue(sraw(t.high(), b.high(), a.low));
        c.release_temp(tmp_high);
        c.release_temp(tmp_low);
    } else {
        c.issue(sraw(t.low, b.low, a.low));
    }
}

fn shift_right_c(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let sh = c.promise_value(a.constant());
    let (b, t) = (b.register(), t.register());
    if size == 8 {
        if sh < 32 {
            c.issue(rlwinm(t.low, b.low, (32 - sh) as u32, sh as u32, 31));
            c.issue(rlwimi(t.low, b.high(), (32 - sh) as u32, 0, (sh - 1) as u32));
            c.issue(srawi(t.high(), b.high(), sh as u32));
        } else {
            c.issue(srawi(t.high(), b.high(), 31));
            c.issue(srawi(t.low, b.high(), (sh - 32) as u32));
        }
    } else {
        c.issue(srawi(t.low, b.low, sh as u32));
    }
}

fn unsigned_shift_right_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let (a, b, t) = (a.register(), b.register(), t.register());
    c.issue(srw(t.low, b.low, a.low));
    if size == 8 {
        let tmp_low = c.acquire_temp();
        let tmp_high = c.acquire_temp();
        c.issue(subfic(tmp_high, a.low, 32));
        c.issue(slw(tmp_low, b.high(), tmp_high));
        c.issue(or(t.low, t.low, tmp_low));
        c.issue(addi(tmp_high, a.low, -32));
        c.issue(srw(tmp_low, b.high(), tmp_high));
        c.issue(or(t.low, t.low, tmp_low));
        c.issue(srw(t.high(), b.high(), a.low));
        c.release_temp(tmp_high);
        c.release_temp(tmp_low);
    }
}

fn unsigned_shift_right_c(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let sh = c.promise_value(a.constant());
    let (b, t) = (b.register(), t.register());
    if size == 8 {
        if sh < 32 {
            c.issue(srwi(t.low, b.low, sh as u32));
            c.issue(rlwimi(t.low, b.high(), (32 - sh) as u32, 0, (sh - 1) as u32));
            c.issue(rlwinm(t.high(), b.high(), (32 - sh) as u32, sh as u32, 31));
        } else {
            c.issue(rlwinm(t.low, b.high(), (64 - sh) as u32, (sh - 32) as u32, 31));
            c.issue(li(t.high(), 0));
        }
    } else {
        c.issue(srwi(t.low, b.low, sh as u32));
    }
}

// Bitwise operations.

fn and_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let (ar, br, tr) = (a.register(), b.register(), t.register());
    if size == 8 {
        and_r(c, 4, a, b, t);
        and_r(c, 4, &reg(ar.high()), &reg(br.high()), &reg(tr.high()));
    } else {
        c.issue(and(tr.low, ar.low, br.low));
    }
}

fn and_c(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let v = c.promise_value(a.constant());
    let (br, tr) = (b.register(), t.register());

    if size == 8 {
        let high = Operand::Constant(c.resolved((v >> 32) & 0xFFFF_FFFF));
        let low = Operand::Constant(c.resolved(v & 0xFFFF_FFFF));

        and_c(c, 4, &low, b, t);
        and_c(c, 4, &high, &reg(br.high()), &reg(tr.high()));
        return;
    }

    // Bitmasks matching 0*1*0* fit a single rlwinm; scan for the run of
    // ones, tracking its bounds counted from the least significant bit.
    let v32 = v as u32;
    let mut state = 0;
    let mut start = 0;
    let mut end = 31;
    for i in 0..32 {
        let bit = (v32 >> i) & 1;
        match state {
            0 => {
                if bit != 0 {
                    start = i;
                    state = 1;
                }
            }
            1 => {
                if bit == 0 {
                    end = i - 1;
                    state = 2;
                }
            }
            _ => {
                if bit != 0 {
                    // More than one run of ones. andi(s) still works when
                    // either half of the mask is zero; otherwise materialize
                    // and fall back to the register form.
                    if v32 >> 16 == 0 {
                        c.issue(andi(tr.low, br.low, v32));
                    } else if v32 & 0xFFFF == 0 {
                        c.issue(andis(tr.low, br.low, v32 >> 16));
                    } else {
                        let use_temporary = br.low == tr.low;
                        let tmp = if use_temporary {
                            c.acquire_temp()
                        } else {
                            tr.low
                        };

                        move_cr(c, 4, a, 4, &reg(tmp));
                        and_r(c, 4, b, &reg(tmp), t);

                        if use_temporary {
                            c.release_temp(tmp);
                        }
                    }
                    return;
                }
            }
        }
    }

    if state == 0 {
        c.issue(li(tr.low, 0));
    } else if start != 0 || end != 31 {
        c.issue(rlwinm(tr.low, br.low, 0, 31 - end, 31 - start));
    } else {
        move_rr(c, 4, b, 4, t);
    }
}

fn or_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let (ar, br, tr) = (a.register(), b.register(), t.register());
    if size == 8 {
        or_r(c, 4, a, b, t);
        or_r(c, 4, &reg(ar.high()), &reg(br.high()), &reg(tr.high()));
    } else {
        c.issue(or(tr.low, ar.low, br.low));
    }
}

fn or_c(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let v = c.promise_value(a.constant());
    let (br, tr) = (b.register(), t.register());

    if size == 8 {
        let high = Operand::Constant(c.resolved((v >> 32) & 0xFFFF_FFFF));
        let low = Operand::Constant(c.resolved(v & 0xFFFF_FFFF));

        or_c(c, 4, &low, b, t);
        or_c(c, 4, &high, &reg(br.high()), &reg(tr.high()));
    } else {
        let v32 = v as u32;
        c.issue(ori(tr.low, br.low, v32));
        if v32 >> 16 != 0 {
            c.issue(oris(tr.low, tr.low, v32 >> 16));
        }
    }
}

fn xor_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let (ar, br, tr) = (a.register(), b.register(), t.register());
    if size == 8 {
        xor_r(c, 4, a, b, t);
        xor_r(c, 4, &reg(ar.high()), &reg(br.high()), &reg(tr.high()));
    } else {
        c.issue(xor(tr.low, ar.low, br.low));
    }
}

fn xor_c(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    let v = c.promise_value(a.constant());
    let (br, tr) = (b.register(), t.register());

    if size == 8 {
        let high = Operand::Constant(c.resolved((v >> 32) & 0xFFFF_FFFF));
        let low = Operand::Constant(c.resolved(v & 0xFFFF_FFFF));

        xor_c(c, 4, &low, b, t);
        xor_c(c, 4, &high, &reg(br.high()), &reg(tr.high()));
    } else {
        let v32 = v as u32;
        if v32 >> 16 != 0 {
            c.issue(xoris(tr.low, br.low, v32 >> 16));
            c.issue(xori(tr.low, tr.low, v32));
        } else {
            c.issue(xori(tr.low, br.low, v32));
        }
    }
}

fn negate_rr(c: &mut Context, src_size: u32, a: &Operand, dst_size: u32, b: &Operand) {
    assert_eq!(src_size, dst_size);

    let (src, dst) = (a.register(), b.register());
    if src_size == 8 {
        c.issue(subfic(dst.low, src.low, 0));
        c.issue(subfze(dst.high(), src.high()));
    } else {
        c.issue(neg(dst.low, src.low));
    }
}

// Compares.

fn compare_rr(c: &mut Context, a_size: u32, a: &Operand, b_size: u32, b: &Operand) {
    assert!(a_size == 4 && b_size == 4);

    let (a, b) = (a.register(), b.register());
    c.issue(cmpw(b.low, a.low));
}

fn compare_cr(c: &mut Context, a_size: u32, a: &Operand, b_size: u32, b: &Operand) {
    assert!(a_size == 4 && b_size == 4);

    let (ap, br) = (a.constant(), b.register());
    if c.promise_resolved(ap) && is_int16(c.promise_value(ap)) {
        let v = c.promise_value(ap) as i32;
        c.issue(cmpwi(br.low, v));
    } else {
        let tmp = c.acquire_temp();
        move_cr(c, a_size, a, b_size, &reg(tmp));
        compare_rr(c, b_size, &reg(tmp), b_size, b);
        c.release_temp(tmp);
    }
}

fn compare_cm(c: &mut Context, a_size: u32, a: &Operand, b_size: u32, b: &Operand) {
    assert!(a_size == 4 && b_size == 4);

    let tmp = c.acquire_temp();
    move_mr(c, b_size, b, b_size, &reg(tmp));
    compare_cr(c, a_size, a, b_size, &reg(tmp));
    c.release_temp(tmp);
}

fn compare_rm(c: &mut Context, a_size: u32, a: &Operand, b_size: u32, b: &Operand) {
    assert!(a_size == 4 && b_size == 4);

    let tmp = c.acquire_temp();
    move_mr(c, b_size, b, b_size, &reg(tmp));
    compare_rr(c, a_size, a, b_size, &reg(tmp));
    c.release_temp(tmp);
}

fn compare_unsigned_rr(c: &mut Context, a_size: u32, a: &Operand, b_size: u32, b: &Operand) {
    assert!(a_size == 4 && b_size == 4);

    let (a, b) = (a.register(), b.register());
    c.issue(cmplw(b.low, a.low));
}

fn compare_unsigned_cr(c: &mut Context, a_size: u32, a: &Operand, b_size: u32, b: &Operand) {
    assert!(a_size == 4 && b_size == 4);

    let (ap, br) = (a.constant(), b.register());
    if c.promise_resolved(ap) && c.promise_value(ap) >> 16 == 0 {
        let v = c.promise_value(ap) as i32;
        c.issue(cmplwi(br.low, v));
    } else {
        let tmp = c.acquire_temp();
        move_cr(c, a_size, a, b_size, &reg(tmp));
        compare_unsigned_rr(c, b_size, &reg(tmp), b_size, b);
        c.release_temp(tmp);
    }
}

/// Patch a branch emitted earlier in this buffer to land on the current
/// position. Used for the short forward jumps inside a single lowering, where
/// no deferred task is needed.
fn patch_branch(c: &mut Context, at: u32, conditional: bool) {
    let word = c.code.word_at(at);
    let target = i64::from(c.code.length());
    c.code
        .set_word_at(at, update_offset(word, u64::from(at), conditional, target));
}

/// Write -1, 0 or +1 into `dst`: a signed compare of the high halves
/// followed, on equality, by an unsigned compare of the low halves.
fn long_compare(
    c: &mut Context,
    al: &Operand,
    ah: &Operand,
    bl: &Operand,
    bh: &Operand,
    dst: RegPair,
    compare_signed: BinaryEmit,
    compare_unsigned: BinaryEmit,
) {
    let negative = Operand::Constant(c.resolved(-1));
    let zero = Operand::Constant(c.resolved(0));
    let positive = Operand::Constant(c.resolved(1));

    compare_signed(c, 4, ah, 4, bh);

    let less = c.code.length();
    c.issue(blt(0));
    let greater = c.code.length();
    c.issue(bgt(0));

    compare_unsigned(c, 4, al, 4, bl);

    let above = c.code.length();
    c.issue(bgt(0));
    let below = c.code.length();
    c.issue(blt(0));

    move_cr(c, 4, &zero, 4, &pair(dst));
    let next_first = c.code.length();
    c.issue(b(0));

    patch_branch(c, less, true);
    patch_branch(c, below, true);

    move_cr(c, 4, &negative, 4, &pair(dst));
    let next_second = c.code.length();
    c.issue(b(0));

    patch_branch(c, greater, true);
    patch_branch(c, above, true);

    move_cr(c, 4, &positive, 4, &pair(dst));

    patch_branch(c, next_first, false);
    patch_branch(c, next_second, false);
}

fn long_compare_r(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    assert_eq!(size, 8);

    let (ar, br) = (a.register(), b.register());
    long_compare(
        c,
        a,
        &reg(ar.high()),
        b,
        &reg(br.high()),
        t.register(),
        compare_rr,
        compare_unsigned_rr,
    );
}

fn long_compare_c(c: &mut Context, size: u32, a: &Operand, b: &Operand, t: &Operand) {
    assert_eq!(size, 8);

    let v = c.promise_value(a.constant());
    let al = Operand::Constant(c.resolved(v & 0xFFFF_FFFF));
    let ah = Operand::Constant(c.resolved((v >> 32) & 0xFFFF_FFFF));

    let br = b.register();
    long_compare(
        c,
        &al,
        &ah,
        b,
        &reg(br.high()),
        t.register(),
        compare_cr,
        compare_unsigned_cr,
    );
}

// Control flow.

fn jump_r(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    let target = a.register();
    c.issue(mtctr(target.low));
    c.issue(bctr());
}

fn call_r(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    let target = a.register();
    c.issue(mtctr(target.low));
    c.issue(bctrl());
}

fn call_c(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    c.append_branch_task(a.constant(), false);
    c.issue(bl(0));
}

fn jump_c(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    c.append_branch_task(a.constant(), false);
    c.issue(b(0));
}

/// The return address of a long call is 12 bytes past the start of the
/// materialization sequence: lis, ori, mtctr, bctrl.
const LONG_BRANCH_PROMISE_OFFSET: u32 = 12;

fn long_call_c(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    let tmp = RegPair::single(Reg::new(0));
    move_cr2(
        c,
        BYTES_PER_WORD,
        a.constant(),
        BYTES_PER_WORD,
        tmp,
        LONG_BRANCH_PROMISE_OFFSET,
    );
    call_r(c, BYTES_PER_WORD, &pair(tmp));
}

fn long_jump_c(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    let tmp = RegPair::single(Reg::new(0));
    move_cr2(
        c,
        BYTES_PER_WORD,
        a.constant(),
        BYTES_PER_WORD,
        tmp,
        LONG_BRANCH_PROMISE_OFFSET,
    );
    jump_r(c, BYTES_PER_WORD, &pair(tmp));
}

fn jump_if_equal_c(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    c.append_branch_task(a.constant(), true);
    c.issue(beq(0));
}

fn jump_if_not_equal_c(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    c.append_branch_task(a.constant(), true);
    c.issue(bne(0));
}

fn jump_if_greater_c(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    c.append_branch_task(a.constant(), true);
    c.issue(bgt(0));
}

fn jump_if_greater_or_equal_c(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    c.append_branch_task(a.constant(), true);
    c.issue(bge(0));
}

fn jump_if_less_c(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    c.append_branch_task(a.constant(), true);
    c.issue(blt(0));
}

fn jump_if_less_or_equal_c(c: &mut Context, size: u32, a: &Operand) {
    assert_eq!(size, BYTES_PER_WORD);

    c.append_branch_task(a.constant(), true);
    c.issue(ble(0));
}

fn ret(c: &mut Context) {
    c.issue(blr());
}

fn memory_barrier(c: &mut Context) {
    c.issue(sync());
}

// Dispatch tables.

pub(crate) const UNARY_SLOTS: usize = UnaryOperation::COUNT * OperandKind::COUNT;
pub(crate) const BINARY_SLOTS: usize =
    BinaryOperation::COUNT * OperandKind::COUNT * OperandKind::COUNT;
pub(crate) const TERNARY_SLOTS: usize = TernaryOperation::COUNT * OperandKind::COUNT;

pub(crate) fn unary_index(op: UnaryOperation, a: OperandKind) -> usize {
    op as usize + UnaryOperation::COUNT * a as usize
}

pub(crate) fn binary_index(op: BinaryOperation, a: OperandKind, b: OperandKind) -> usize {
    op as usize
        + BinaryOperation::COUNT * a as usize
        + BinaryOperation::COUNT * OperandKind::COUNT * b as usize
}

pub(crate) fn ternary_index(op: TernaryOperation, a: OperandKind) -> usize {
    op as usize + TernaryOperation::COUNT * a as usize
}

/// Lowering routines indexed by operation and operand kinds. Slots left empty
/// fall back to materializing the first operand into a register and
/// re-dispatching.
pub(crate) struct Dispatch {
    pub nullary: [Option<NullaryEmit>; Operation::COUNT],
    pub unary: [Option<UnaryEmit>; UNARY_SLOTS],
    pub binary: [Option<BinaryEmit>; BINARY_SLOTS],
    pub ternary: [Option<TernaryEmit>; TERNARY_SLOTS],
}

pub(crate) fn populate_tables() -> Dispatch {
    use BinaryOperation::{Compare, Move, MoveZ, Negate};
    use OperandKind::{Address as A, Constant as C, Memory as M, Register as R};
    use TernaryOperation::{
        Add, And, Divide, LongCompare, Multiply, Or, Remainder, ShiftLeft, ShiftRight, Subtract,
        UnsignedShiftRight, Xor,
    };
    use UnaryOperation::{
        AlignedCall, Call, Jump, JumpIfEqual, JumpIfGreater, JumpIfGreaterOrEqual, JumpIfLess,
        JumpIfLessOrEqual, JumpIfNotEqual, LongCall, LongJump,
    };

    let mut nullary: [Option<NullaryEmit>; Operation::COUNT] = [None; Operation::COUNT];
    let mut unary: [Option<UnaryEmit>; UNARY_SLOTS] = [None; UNARY_SLOTS];
    let mut binary: [Option<BinaryEmit>; BINARY_SLOTS] = [None; BINARY_SLOTS];
    let mut ternary: [Option<TernaryEmit>; TERNARY_SLOTS] = [None; TERNARY_SLOTS];

    nullary[Operation::Return as usize] = Some(ret as NullaryEmit);
    nullary[Operation::LoadBarrier as usize] = Some(memory_barrier as NullaryEmit);
    nullary[Operation::StoreStoreBarrier as usize] = Some(memory_barrier as NullaryEmit);
    nullary[Operation::StoreLoadBarrier as usize] = Some(memory_barrier as NullaryEmit);

    unary[unary_index(LongCall, C)] = Some(long_call_c as UnaryEmit);
    unary[unary_index(LongJump, C)] = Some(long_jump_c as UnaryEmit);

    unary[unary_index(Jump, R)] = Some(jump_r as UnaryEmit);
    unary[unary_index(Jump, C)] = Some(jump_c as UnaryEmit);

    unary[unary_index(JumpIfEqual, C)] = Some(jump_if_equal_c as UnaryEmit);
    unary[unary_index(JumpIfNotEqual, C)] = Some(jump_if_not_equal_c as UnaryEmit);
    unary[unary_index(JumpIfGreater, C)] = Some(jump_if_greater_c as UnaryEmit);
    unary[unary_index(JumpIfGreaterOrEqual, C)] = Some(jump_if_greater_or_equal_c as UnaryEmit);
    unary[unary_index(JumpIfLess, C)] = Some(jump_if_less_c as UnaryEmit);
    unary[unary_index(JumpIfLessOrEqual, C)] = Some(jump_if_less_or_equal_c as UnaryEmit);

    unary[unary_index(Call, C)] = Some(call_c as UnaryEmit);
    unary[unary_index(Call, R)] = Some(call_r as UnaryEmit);

    unary[unary_index(AlignedCall, C)] = Some(call_c as UnaryEmit);
    unary[unary_index(AlignedCall, R)] = Some(call_r as UnaryEmit);

    binary[binary_index(Move, R, R)] = Some(move_rr as BinaryEmit);
    binary[binary_index(Move, C, R)] = Some(move_cr as BinaryEmit);
    binary[binary_index(Move, C, M)] = Some(move_cm as BinaryEmit);
    binary[binary_index(Move, M, R)] = Some(move_mr as BinaryEmit);
    binary[binary_index(Move, R, M)] = Some(move_rm as BinaryEmit);
    binary[binary_index(Move, A, R)] = Some(move_ar as BinaryEmit);

    binary[binary_index(MoveZ, R, R)] = Some(move_zrr as BinaryEmit);
    binary[binary_index(MoveZ, M, R)] = Some(move_zmr as BinaryEmit);
    binary[binary_index(MoveZ, C, R)] = Some(move_cr as BinaryEmit);

    binary[binary_index(Compare, R, R)] = Some(compare_rr as BinaryEmit);
    binary[binary_index(Compare, C, R)] = Some(compare_cr as BinaryEmit);
    binary[binary_index(Compare, R, M)] = Some(compare_rm as BinaryEmit);
    binary[binary_index(Compare, C, M)] = Some(compare_cm as BinaryEmit);

    binary[binary_index(Negate, R, R)] = Some(negate_rr as BinaryEmit);

    ternary[ternary_index(Add, R)] = Some(add_r as TernaryEmit);
    ternary[ternary_index(Add, C)] = Some(add_c as TernaryEmit);

    ternary[ternary_index(Subtract, R)] = Some(sub_r as TernaryEmit);
    ternary[ternary_index(Subtract, C)] = Some(sub_c as TernaryEmit);

    ternary[ternary_index(Multiply, R)] = Some(multiply_r as TernaryEmit);

    ternary[ternary_index(Divide, R)] = Some(divide_r as TernaryEmit);

    ternary[ternary_index(Remainder, R)] = Some(remainder_r as TernaryEmit);

    ternary[ternary_index(ShiftLeft, R)] = Some(shift_left_r as TernaryEmit);
    ternary[ternary_index(ShiftLeft, C)] = Some(shift_left_c as TernaryEmit);

    ternary[ternary_index(ShiftRight, R)] = Some(shift_right_r as TernaryEmit);
    ternary[ternary_index(ShiftRight, C)] = Some(shift_right_c as TernaryEmit);

    ternary[ternary_index(UnsignedShiftRight, R)] = Some(unsigned_shift_right_r as TernaryEmit);
    ternary[ternary_index(UnsignedShiftRight, C)] = Some(unsigned_shift_right_c as TernaryEmit);

    ternary[ternary_index(And, C)] = Some(and_c as TernaryEmit);
    ternary[ternary_index(And, R)] = Some(and_r as TernaryEmit);

    ternary[ternary_index(Or, C)] = Some(or_c as TernaryEmit);
    ternary[ternary_index(Or, R)] = Some(or_r as TernaryEmit);

    ternary[ternary_index(Xor, C)] = Some(xor_c as TernaryEmit);
    ternary[ternary_index(Xor, R)] = Some(xor_r as TernaryEmit);

    ternary[ternary_index(LongCompare, R)] = Some(long_compare_r as TernaryEmit);
    ternary[ternary_index(LongCompare, C)] = Some(long_compare_c as TernaryEmit);

    Dispatch {
        nullary,
        unary,
        binary,
        ternary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Client;
    use crate::arch::Ppc32;
    use crate::asm::Assembler;

    struct TestClient {
        free: Vec<Reg>,
        outstanding: u32,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                free: (24..32).rev().map(Reg::new).collect(),
                outstanding: 0,
            }
        }
    }

    impl Client for TestClient {
        fn acquire_temporary(&mut self) -> Reg {
            self.outstanding += 1;
            self.free.pop().expect("out of temporaries")
        }

        fn release_temporary(&mut self, reg: Reg) {
            self.outstanding -= 1;
            self.free.push(reg);
        }
    }

    fn emitted(asm: &Assembler) -> Vec<u32> {
        (0..asm.length() / 4)
            .map(|i| asm.ctx.code.word_at(i * 4))
            .collect()
    }

    fn r(index: u8) -> Reg {
        Reg::new(index)
    }

    fn single(index: u8) -> Operand {
        Operand::Register(RegPair::single(r(index)))
    }

    fn double(low: u8, high: u8) -> Operand {
        Operand::Register(RegPair::pair(r(low), r(high)))
    }

    /// Run one ternary operation with a constant first operand against a
    /// fresh assembler and return the emitted words.
    fn ternary_with_constant(
        op: TernaryOperation,
        value: i64,
        size: u32,
        b: Operand,
        t: Operand,
    ) -> (Vec<u32>, u32) {
        let mut client = TestClient::new();
        let words = {
            let mut asm = Assembler::new(Ppc32::new());
            asm.set_client(&mut client);
            let a = asm.resolved_promise(value);
            asm.apply_ternary(op, 4, &Operand::Constant(a), size, &b, size, &t);
            emitted(&asm)
        };
        (words, client.outstanding)
    }

    #[test]
    fn and_with_contiguous_mask_is_one_rotate() {
        let (words, _) = ternary_with_constant(
            TernaryOperation::And,
            0xFF00,
            4,
            single(4),
            single(3),
        );
        assert_eq!(words, [rlwinm(r(3), r(4), 0, 16, 23)]);
    }

    #[test]
    fn and_with_halfword_mask_is_one_rotate() {
        let (words, _) =
            ternary_with_constant(TernaryOperation::And, 0xFFFF, 4, single(4), single(3));
        assert_eq!(words, [rlwinm(r(3), r(4), 0, 16, 31)]);
    }

    #[test]
    fn and_with_scattered_low_mask_uses_andi() {
        let (words, _) =
            ternary_with_constant(TernaryOperation::And, 0x5555, 4, single(4), single(3));
        assert_eq!(words, [andi(r(3), r(4), 0x5555)]);
    }

    #[test]
    fn and_with_scattered_high_mask_uses_andis() {
        let (words, _) = ternary_with_constant(
            TernaryOperation::And,
            0x5555_0000,
            4,
            single(4),
            single(3),
        );
        assert_eq!(words, [andis(r(3), r(4), 0x5555)]);
    }

    #[test]
    fn and_with_scattered_wide_mask_materializes() {
        let (words, outstanding) = ternary_with_constant(
            TernaryOperation::And,
            0x0F0F_0F0F,
            4,
            single(4),
            single(3),
        );
        assert_eq!(
            words,
            [
                lis(r(3), 0x0F0F),
                ori(r(3), r(3), 0x0F0F),
                and(r(3), r(4), r(3)),
            ]
        );
        assert_eq!(outstanding, 0);
    }

    #[test]
    fn and_with_aliased_destination_goes_through_a_temporary() {
        let (words, outstanding) = ternary_with_constant(
            TernaryOperation::And,
            0x0F0F_0F0F,
            4,
            single(4),
            single(4),
        );
        assert_eq!(
            words,
            [
                lis(r(24), 0x0F0F),
                ori(r(24), r(24), 0x0F0F),
                and(r(4), r(4), r(24)),
            ]
        );
        assert_eq!(outstanding, 0);
    }

    #[test]
    fn or_with_wide_constant_takes_two_instructions() {
        let (words, _) = ternary_with_constant(
            TernaryOperation::Or,
            0x1234_0000,
            4,
            single(4),
            single(3),
        );
        assert_eq!(words, [ori(r(3), r(4), 0), oris(r(3), r(3), 0x1234)]);
    }

    #[test]
    fn or_with_narrow_constant_takes_one_instruction() {
        let (words, _) =
            ternary_with_constant(TernaryOperation::Or, 0x5678, 4, single(4), single(3));
        assert_eq!(words, [ori(r(3), r(4), 0x5678)]);
    }

    #[test]
    fn xor_with_wide_constant_takes_two_instructions() {
        let (words, _) = ternary_with_constant(
            TernaryOperation::Xor,
            0x1234_5678,
            4,
            single(4),
            single(3),
        );
        assert_eq!(
            words,
            [xoris(r(3), r(4), 0x1234), xori(r(3), r(3), 0x5678)]
        );
    }

    #[test]
    fn add_with_wide_constant_propagates_the_carry() {
        let (words, _) = ternary_with_constant(
            TernaryOperation::Add,
            0x0001_8000,
            4,
            single(4),
            single(3),
        );
        // The low half sign-extends as negative, so the high half gets one
        // extra.
        assert_eq!(words, [addi(r(3), r(4), 0x8000u16 as i16 as i32), addis(r(3), r(3), 2)]);
    }

    #[test]
    fn subtract_constant_becomes_negated_add() {
        let (words, _) =
            ternary_with_constant(TernaryOperation::Subtract, 5, 4, single(4), single(3));
        assert_eq!(words, [addi(r(3), r(4), -5)]);
    }

    #[test]
    fn doubleword_add_chains_the_carry() {
        let mut asm = Assembler::new(Ppc32::new());
        asm.apply_ternary(
            TernaryOperation::Add,
            8,
            &double(5, 6),
            8,
            &double(7, 8),
            8,
            &double(3, 4),
        );
        assert_eq!(
            emitted(&asm),
            [addc(r(3), r(5), r(7)), adde(r(4), r(6), r(8))]
        );
    }

    #[test]
    fn doubleword_negate_borrows_through_the_high_half() {
        let mut asm = Assembler::new(Ppc32::new());
        asm.apply_binary(BinaryOperation::Negate, 8, &double(5, 6), 8, &double(3, 4));
        assert_eq!(emitted(&asm), [subfic(r(3), r(5), 0), subfze(r(4), r(6))]);
    }

    #[test]
    fn doubleword_multiply_sums_three_partial_products() {
        let mut asm = Assembler::new(Ppc32::new());
        asm.apply_ternary(
            TernaryOperation::Multiply,
            8,
            &double(5, 6),
            8,
            &double(7, 8),
            8,
            &double(3, 4),
        );
        assert_eq!(
            emitted(&asm),
            [
                mullw(r(4), r(6), r(7)),
                mullw(r(3), r(5), r(8)),
                add(r(4), r(4), r(3)),
                mulhwu(r(3), r(5), r(7)),
                add(r(4), r(4), r(3)),
                mullw(r(3), r(5), r(7)),
            ]
        );
    }

    #[test]
    fn remainder_reuses_divide_and_multiply() {
        let mut asm = Assembler::new(Ppc32::new());
        asm.apply_ternary(
            TernaryOperation::Remainder,
            4,
            &single(5),
            4,
            &single(6),
            4,
            &single(3),
        );
        assert_eq!(
            emitted(&asm),
            [
                divw(r(3), r(6), r(5)),
                mullw(r(3), r(5), r(3)),
                subf(r(3), r(3), r(6)),
            ]
        );
    }

    #[test]
    fn shift_left_by_small_constant_splices_the_halves() {
        let (words, _) = ternary_with_constant(
            TernaryOperation::ShiftLeft,
            4,
            8,
            double(5, 6),
            double(3, 4),
        );
        assert_eq!(
            words,
            [
                rlwinm(r(4), r(6), 4, 0, 27),
                rlwimi(r(4), r(5), 4, 28, 31),
                slwi(r(3), r(5), 4),
            ]
        );
    }

    #[test]
    fn shift_left_by_large_constant_crosses_the_words() {
        let (words, _) = ternary_with_constant(
            TernaryOperation::ShiftLeft,
            40,
            8,
            double(5, 6),
            double(3, 4),
        );
        assert_eq!(words, [rlwinm(r(4), r(5), 8, 0, 23), li(r(3), 0)]);
    }

    #[test]
    fn shift_right_by_small_constant_splices_the_halves() {
        let (words, _) = ternary_with_constant(
            TernaryOperation::ShiftRight,
            4,
            8,
            double(5, 6),
            double(3, 4),
        );
        assert_eq!(
            words,
            [
                rlwinm(r(3), r(5), 28, 4, 31),
                rlwimi(r(3), r(6), 28, 0, 3),
                srawi(r(4), r(6), 4),
            ]
        );
    }

    #[test]
    fn unsigned_shift_right_by_large_constant_zero_fills() {
        let (words, _) = ternary_with_constant(
            TernaryOperation::UnsignedShiftRight,
            40,
            8,
            double(5, 6),
            double(3, 4),
        );
        assert_eq!(words, [rlwinm(r(3), r(6), 24, 8, 31), li(r(4), 0)]);
    }

    #[test]
    fn indexed_accesses_normalize_the_index() {
        let mut client = TestClient::new();
        let words = {
            let mut asm = Assembler::new(Ppc32::new());
            asm.set_client(&mut client);
            let src = Operand::Memory(Memory {
                base: r(9),
                offset: 8,
                index: Some(r(10)),
                scale: 4,
            });
            asm.apply_binary(BinaryOperation::Move, 4, &src, 4, &single(3));
            emitted(&asm)
        };
        assert_eq!(
            words,
            [
                slwi(r(24), r(10), 2),
                addi(r(24), r(24), 8),
                lwzx(r(3), r(9), r(24)),
            ]
        );
        assert_eq!(client.outstanding, 0);
    }

    #[test]
    fn halfword_loads_distinguish_extension() {
        let mut asm = Assembler::new(Ppc32::new());
        let src = Operand::Memory(Memory::reg_offset(r(9), 6));
        asm.apply_binary(BinaryOperation::Move, 2, &src, 4, &single(3));
        asm.apply_binary(BinaryOperation::MoveZ, 2, &src, 4, &single(3));
        assert_eq!(emitted(&asm), [lha(r(3), r(9), 6), lhz(r(3), r(9), 6)]);
    }

    #[test]
    fn doubleword_stores_write_high_word_first() {
        let mut asm = Assembler::new(Ppc32::new());
        let dst = Operand::Memory(Memory::reg_offset(r(9), 16));
        asm.apply_binary(BinaryOperation::Move, 8, &double(5, 6), 8, &dst);
        assert_eq!(
            emitted(&asm),
            [stw(r(6), r(9), 16), stw(r(5), r(9), 20)]
        );
    }

    #[test]
    fn narrow_register_moves_extend() {
        let mut asm = Assembler::new(Ppc32::new());
        asm.apply_binary(BinaryOperation::Move, 1, &single(4), 4, &single(3));
        asm.apply_binary(BinaryOperation::Move, 2, &single(4), 4, &single(3));
        asm.apply_binary(BinaryOperation::MoveZ, 2, &single(4), 4, &single(3));
        asm.apply_binary(BinaryOperation::Move, 4, &single(4), 8, &double(3, 5));
        assert_eq!(
            emitted(&asm),
            [
                extsb(r(3), r(4)),
                extsh(r(3), r(4)),
                andi(r(3), r(4), 0xFFFF),
                mr(r(3), r(4)),
                srawi(r(5), r(4), 31),
            ]
        );
    }

    #[test]
    fn fully_aliased_pair_moves_swap_through_a_temporary() {
        let mut client = TestClient::new();
        let words = {
            let mut asm = Assembler::new(Ppc32::new());
            asm.set_client(&mut client);
            asm.apply_binary(BinaryOperation::Move, 8, &double(3, 4), 8, &double(4, 3));
            emitted(&asm)
        };
        assert_eq!(
            words,
            [mr(r(24), r(3)), mr(r(3), r(4)), mr(r(4), r(24))]
        );
        assert_eq!(client.outstanding, 0);
    }

    #[test]
    fn compares_use_the_immediate_form_when_it_fits() {
        let mut client = TestClient::new();
        let words = {
            let mut asm = Assembler::new(Ppc32::new());
            asm.set_client(&mut client);
            let small = asm.resolved_promise(5);
            let large = asm.resolved_promise(0x1234_5678);
            asm.apply_binary(BinaryOperation::Compare, 4, &Operand::Constant(small), 4, &single(4));
            asm.apply_binary(BinaryOperation::Compare, 4, &Operand::Constant(large), 4, &single(4));
            emitted(&asm)
        };
        assert_eq!(
            words,
            [
                cmpwi(r(4), 5),
                lis(r(24), 0x1234),
                ori(r(24), r(24), 0x5678),
                cmpw(r(4), r(24)),
            ]
        );
        assert_eq!(client.outstanding, 0);
    }

    #[test]
    fn doubleword_constant_stores_split_the_halves() {
        let mut client = TestClient::new();
        let words = {
            let mut asm = Assembler::new(Ppc32::new());
            asm.set_client(&mut client);
            let value = asm.resolved_promise(0x1_0000_0002);
            let dst = Operand::Memory(Memory::reg_offset(r(9), 0));
            asm.apply_binary(BinaryOperation::Move, 8, &Operand::Constant(value), 8, &dst);
            emitted(&asm)
        };
        assert_eq!(
            words,
            [
                li(r(24), 2),
                stw(r(24), r(9), 4),
                li(r(24), 1),
                stw(r(24), r(9), 0),
            ]
        );
        assert_eq!(client.outstanding, 0);
    }

    #[test]
    fn long_compare_writes_the_three_way_result() {
        let mut asm = Assembler::new(Ppc32::new());
        asm.apply_ternary(
            TernaryOperation::LongCompare,
            8,
            &double(5, 6),
            8,
            &double(7, 8),
            8,
            &double(3, 4),
        );

        // Signed compare of the high halves decides unless they are equal;
        // then an unsigned compare of the low halves does. All five forward
        // branches are patched in place.
        assert_eq!(
            emitted(&asm),
            [
                cmpw(r(8), r(6)),
                blt(28),
                bgt(32),
                cmplw(r(7), r(5)),
                bgt(24),
                blt(12),
                li(r(3), 0),
                b(16),
                li(r(3), -1),
                b(8),
                li(r(3), 1),
            ]
        );
    }

    #[test]
    fn address_moves_load_through_the_materialized_pointer() {
        let mut asm = Assembler::new(Ppc32::new());
        let address = asm.resolved_promise(0x1000);
        asm.apply_binary(BinaryOperation::Move, 4, &Operand::Address(address), 4, &single(3));
        assert_eq!(emitted(&asm), [li(r(3), 0x1000), lwz(r(3), r(3), 0)]);
    }

    #[test]
    fn long_jumps_materialize_into_the_scratch_register() {
        let mut asm = Assembler::new(Ppc32::new());
        let target = asm.delayed_promise();
        asm.apply_unary(UnaryOperation::LongJump, 4, &Operand::Constant(target));
        assert_eq!(
            emitted(&asm),
            [
                lis(r(0), 0),
                ori(r(0), r(0), 0),
                mtctr(r(0)),
                bctr(),
            ]
        );
    }

    #[test]
    fn jumps_to_registers_go_through_the_count_register() {
        let mut asm = Assembler::new(Ppc32::new());
        asm.apply_unary(UnaryOperation::Jump, 4, &single(11));
        asm.apply_unary(UnaryOperation::Call, 4, &single(12));
        assert_eq!(
            emitted(&asm),
            [mtctr(r(11)), bctr(), mtctr(r(12)), bctrl()]
        );
    }
}
