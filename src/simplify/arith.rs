//! Integer bitwise, arithmetic, shift, extension, and bit-field rewrite rules
//! (spec.md §4.4): constant folding, identity/absorption, reassociation, extension
//! elision, and the `EXTRACT_*` composition rules.

use crate::error::OptResult;
use crate::function::CodeContainer;
use crate::ids::InstrId;
use crate::instruction::Opcode;
use crate::simplify::{find_or_make_const, new_value};
use crate::value::IntWidth;

fn as_const(code: &CodeContainer, id: InstrId) -> Option<(IntWidth, u64)> {
    match code.instr(id).opcode {
        Opcode::UIntConst(w, v) => Some((w, v)),
        _ => None,
    }
}

fn const_value(code: &CodeContainer, id: InstrId) -> Option<u64> {
    as_const(code, id).map(|(_, v)| v)
}

/// `0xFF` / `0xFFFF` / `0xFFFFFFFF` ⇒ the narrower width whose zero-extension the
/// mask represents (spec.md §4.4 "AND with `2^k - 1` masks ... become zero-extension
/// opcodes").
fn zero_extend_mask_width(v: u64) -> Option<IntWidth> {
    match v {
        0xFF => Some(IntWidth::W8),
        0xFFFF => Some(IntWidth::W16),
        0xFFFF_FFFF => Some(IntWidth::W32),
        _ => None,
    }
}

/// Folds the constant operand of `(x OP c1) OP c2` (or its commuted form `c1 OP (x
/// OP c2)`) for a commutative, associative bitwise op, returning `(x, combined)`.
fn reassociate_bitwise(
    code: &CodeContainer,
    w: IntWidth,
    a: InstrId,
    b: InstrId,
    same_opcode: impl Fn(&Opcode) -> Option<(InstrId, InstrId)>,
    combine: impl Fn(u64, u64) -> u64,
) -> Option<(InstrId, u64)> {
    if let Some(c2) = const_value(code, b) {
        if let Some((x, c1_id)) = same_opcode(&code.instr(a).opcode) {
            if let Some(c1) = const_value(code, c1_id) {
                return Some((x, combine(c1, c2)));
            }
        }
    }
    if let Some(c1) = const_value(code, a) {
        if let Some((x, c2_id)) = same_opcode(&code.instr(b).opcode) {
            if let Some(c2) = const_value(code, c2_id) {
                return Some((x, combine(c1, c2)));
            }
        }
    }
    None
}

/// Collapses `ADD(REF_LOCAL(idx, c1), c2)` (and the analogous `GET_GLOBAL` /
/// `GET_THREAD_LOCAL` forms) into a single address-producing instruction with the
/// constant offsets pre-summed (spec.md §4.4; SPEC_FULL.md §5 resolves the
/// `REF_LOCAL` open question by implementing this symmetric case explicitly).
fn fold_base_offset(code: &mut CodeContainer, block: crate::ids::BlockId, a: InstrId, delta: u64) -> Option<InstrId> {
    match code.instr(a).opcode {
        Opcode::RefLocal { local_index, offset } => {
            let (w, c1) = as_const(code, offset)?;
            let new_offset = find_or_make_const(code, block, w, c1.wrapping_add(delta));
            Some(new_value(code, block, Opcode::RefLocal { local_index, offset: new_offset }))
        }
        Opcode::GlobalOffset { global_index, offset } => {
            let (w, c1) = as_const(code, offset)?;
            let new_offset = find_or_make_const(code, block, w, c1.wrapping_add(delta));
            Some(new_value(code, block, Opcode::GlobalOffset { global_index, offset: new_offset }))
        }
        Opcode::ThreadLocalOffset { tls_index, offset } => {
            let (w, c1) = as_const(code, offset)?;
            let new_offset = find_or_make_const(code, block, w, c1.wrapping_add(delta));
            Some(new_value(code, block, Opcode::ThreadLocalOffset { tls_index, offset: new_offset }))
        }
        _ => None,
    }
}

pub fn try_simplify(code: &mut CodeContainer, instr: InstrId) -> OptResult<Option<InstrId>> {
    let block = code.instr(instr).block;
    let opcode = code.instr(instr).opcode;

    let result = match opcode {
        Opcode::IntAnd(w, a, b) => {
            if a == b {
                Some(a)
            } else if let Some(0) = const_value(code, b) {
                Some(find_or_make_const(code, block, w, 0))
            } else if let (Some((_, av)), Some((_, bv))) = (as_const(code, a), as_const(code, b)) {
                Some(find_or_make_const(code, block, w, av & bv))
            } else if const_value(code, b) == Some(w.mask()) {
                Some(a)
            } else if let Some((x, combined)) = reassociate_bitwise(
                code,
                w,
                a,
                b,
                |op| match op {
                    Opcode::IntAnd(_, x, c) => Some((*x, *c)),
                    _ => None,
                },
                |c1, c2| c1 & c2,
            ) {
                let c = find_or_make_const(code, block, w, combined);
                Some(new_value(code, block, Opcode::IntAnd(w, x, c)))
            } else if let Some(mask_width) = const_value(code, b).and_then(zero_extend_mask_width) {
                if mask_width.bits() < w.bits() {
                    Some(new_value(code, block, Opcode::IntExtend { from: mask_width, to: w, signed: false, operand: a }))
                } else {
                    None
                }
            } else {
                None
            }
        }

        Opcode::IntOr(w, a, b) => {
            if a == b {
                Some(a)
            } else if let Some(0) = const_value(code, b) {
                Some(a)
            } else if let (Some((_, av)), Some((_, bv))) = (as_const(code, a), as_const(code, b)) {
                Some(find_or_make_const(code, block, w, av | bv))
            } else if const_value(code, b) == Some(w.mask()) {
                Some(find_or_make_const(code, block, w, w.mask()))
            } else if let Some((x, combined)) = reassociate_bitwise(
                code,
                w,
                a,
                b,
                |op| match op {
                    Opcode::IntOr(_, x, c) => Some((*x, *c)),
                    _ => None,
                },
                |c1, c2| c1 | c2,
            ) {
                let c = find_or_make_const(code, block, w, combined);
                Some(new_value(code, block, Opcode::IntOr(w, x, c)))
            } else {
                None
            }
        }

        Opcode::IntXor(w, a, b) => {
            if a == b {
                Some(find_or_make_const(code, block, w, 0))
            } else if let Some(0) = const_value(code, b) {
                Some(a)
            } else if let (Some((_, av)), Some((_, bv))) = (as_const(code, a), as_const(code, b)) {
                Some(find_or_make_const(code, block, w, av ^ bv))
            } else if let Some((x, combined)) = reassociate_bitwise(
                code,
                w,
                a,
                b,
                |op| match op {
                    Opcode::IntXor(_, x, c) => Some((*x, *c)),
                    _ => None,
                },
                |c1, c2| c1 ^ c2,
            ) {
                let c = find_or_make_const(code, block, w, combined);
                Some(new_value(code, block, Opcode::IntXor(w, x, c)))
            } else {
                None
            }
        }

        Opcode::IntNot(w, x) => {
            if let Opcode::IntNot(_, inner) = code.instr(x).opcode {
                Some(inner)
            } else if let Some((_, v)) = as_const(code, x) {
                Some(find_or_make_const(code, block, w, !v & w.mask()))
            } else {
                None
            }
        }

        Opcode::IntAdd(w, a, b) => {
            if let Some(0) = const_value(code, b) {
                Some(a)
            } else if let Some(0) = const_value(code, a) {
                Some(b)
            } else if let (Some((_, av)), Some((_, bv))) = (as_const(code, a), as_const(code, b)) {
                Some(find_or_make_const(code, block, w, av.wrapping_add(bv)))
            } else if let Some(delta) = const_value(code, b) {
                if let Some(folded) = fold_base_offset(code, block, a, delta) {
                    Some(folded)
                } else {
                    additive_reassociate(code, block, w, a, delta, true)
                }
            } else if let Some(delta) = const_value(code, a) {
                if let Some(folded) = fold_base_offset(code, block, b, delta) {
                    Some(folded)
                } else {
                    additive_reassociate(code, block, w, b, delta, true)
                }
            } else {
                None
            }
        }

        Opcode::IntSub(w, a, b) => {
            if a == b {
                Some(find_or_make_const(code, block, w, 0))
            } else if let Some(0) = const_value(code, b) {
                Some(a)
            } else if let (Some((_, av)), Some((_, bv))) = (as_const(code, a), as_const(code, b)) {
                Some(find_or_make_const(code, block, w, av.wrapping_sub(bv)))
            } else if let Some(delta) = const_value(code, b) {
                additive_reassociate(code, block, w, a, delta, false)
            } else {
                None
            }
        }

        Opcode::IntMul(w, a, b) => {
            if const_value(code, b) == Some(0) || const_value(code, a) == Some(0) {
                Some(find_or_make_const(code, block, w, 0))
            } else if let Some(1) = const_value(code, b) {
                Some(a)
            } else if let Some(1) = const_value(code, a) {
                Some(b)
            } else if let (Some((_, av)), Some((_, bv))) = (as_const(code, a), as_const(code, b)) {
                Some(find_or_make_const(code, block, w, av.wrapping_mul(bv)))
            } else {
                None
            }
        }

        Opcode::IntDiv { lhs, rhs, .. } => {
            if let Some(1) = const_value(code, rhs) {
                Some(lhs)
            } else {
                None
            }
        }

        Opcode::IntShl(w, a, b) => shift_rule(code, block, w, a, b, ShiftKind::Shl),
        Opcode::IntShr(w, a, b) => shift_rule(code, block, w, a, b, ShiftKind::Shr),
        Opcode::IntSar(w, a, b) => shift_rule(code, block, w, a, b, ShiftKind::Sar),

        Opcode::IntExtend { from, to, signed, operand } => {
            if from == to {
                Some(operand)
            } else if let Opcode::IntExtend { from: from2, to: to2, signed: signed2, operand: inner } = code.instr(operand).opcode {
                if to2 == from {
                    // An outer zero-extend always wins (it truncates away anything
                    // the inner sign-extend put in the high bits); otherwise the
                    // inner's own sign decides, since the inner already establishes
                    // the true sign-extended value up to `from`.
                    let new_signed = signed && signed2;
                    Some(new_value(code, block, Opcode::IntExtend { from: from2, to, signed: new_signed, operand: inner }))
                } else {
                    None
                }
            } else if let Opcode::Load { width: crate::instruction::MemWidth::Int(lw), addr, extension: crate::value::LoadExtension::NoExtend, flags } =
                code.instr(operand).opcode
            {
                if lw == from && crate::introspect::get_sole_use(code, operand)? == Some(instr) {
                    let new_ext = if signed {
                        crate::value::LoadExtension::SignExtend(to)
                    } else {
                        crate::value::LoadExtension::ZeroExtend(to)
                    };
                    Some(new_value(
                        code,
                        block,
                        Opcode::Load { width: crate::instruction::MemWidth::Int(lw), addr, extension: new_ext, flags },
                    ))
                } else {
                    None
                }
            } else {
                None
            }
        }

        Opcode::BitIntCast { from_bits, to_bits, operand, .. } if from_bits == to_bits => Some(operand),

        // STORE_w(addr, EXT(v)) where EXT widens from exactly `w` ⇒ STORE_w(addr, v):
        // the store only persists the low `w` bits, which the extension left intact.
        Opcode::Store { width: crate::instruction::MemWidth::Int(w), addr, value, flags } => {
            match code.instr(value).opcode {
                Opcode::IntExtend { from, operand, .. } if from == w => {
                    Some(new_value(code, block, Opcode::Store { width: crate::instruction::MemWidth::Int(w), addr, value: operand, flags }))
                }
                _ => None,
            }
        }

        Opcode::AtomicStore { width: crate::instruction::MemWidth::Int(w), addr, value, ordering } => match code.instr(value).opcode {
            Opcode::IntExtend { from, operand, .. } if from == w => Some(new_value(
                code,
                block,
                Opcode::AtomicStore { width: crate::instruction::MemWidth::Int(w), addr, value: operand, ordering },
            )),
            _ => None,
        },

        Opcode::AtomicCmpxchg { width: crate::instruction::MemWidth::Int(w), addr, expected, desired, ordering } => {
            let narrowed_expected = match code.instr(expected).opcode {
                Opcode::IntExtend { from, operand, .. } if from == w => Some(operand),
                _ => None,
            };
            let narrowed_desired = match code.instr(desired).opcode {
                Opcode::IntExtend { from, operand, .. } if from == w => Some(operand),
                _ => None,
            };
            if narrowed_expected.is_some() || narrowed_desired.is_some() {
                Some(new_value(
                    code,
                    block,
                    Opcode::AtomicCmpxchg {
                        width: crate::instruction::MemWidth::Int(w),
                        addr,
                        expected: narrowed_expected.unwrap_or(expected),
                        desired: narrowed_desired.unwrap_or(desired),
                        ordering,
                    },
                ))
            } else {
                None
            }
        }

        // Composing two bit-field extractions when the outer range fits within the
        // inner's (spec.md §4.4 "Bit-field extractions").
        Opcode::BitfieldExtract { signed, base, offset, length } => match code.instr(base).opcode {
            Opcode::BitfieldExtract { base: base2, offset: offset2, length: length2, .. } if offset + length <= length2 => {
                Some(new_value(code, block, Opcode::BitfieldExtract { signed, base: base2, offset: offset + offset2, length }))
            }
            _ => None,
        },

        _ => None,
    };

    Ok(result)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ShiftKind {
    Shl,
    Shr,
    Sar,
}

impl ShiftKind {
    fn is_logical(self) -> bool {
        matches!(self, ShiftKind::Shl | ShiftKind::Shr)
    }

    fn rebuild(self, w: IntWidth, x: InstrId, amount: InstrId) -> Opcode {
        match self {
            ShiftKind::Shl => Opcode::IntShl(w, x, amount),
            ShiftKind::Shr => Opcode::IntShr(w, x, amount),
            ShiftKind::Sar => Opcode::IntSar(w, x, amount),
        }
    }

    fn matches(self, opcode: &Opcode) -> Option<(InstrId, InstrId)> {
        match (self, opcode) {
            (ShiftKind::Shl, Opcode::IntShl(_, x, c)) => Some((*x, *c)),
            (ShiftKind::Shr, Opcode::IntShr(_, x, c)) => Some((*x, *c)),
            (ShiftKind::Sar, Opcode::IntSar(_, x, c)) => Some((*x, *c)),
            _ => None,
        }
    }
}

/// Shift-by-0 identity, shift-by-`>=width` folding/saturation, and reassociation of
/// a shift-of-shift-by-constant (spec.md §4.4 "Shifts").
fn shift_rule(code: &mut CodeContainer, block: crate::ids::BlockId, w: IntWidth, a: InstrId, b: InstrId, kind: ShiftKind) -> Option<InstrId> {
    let bits = w.bits() as u64;
    let c2 = const_value(code, b)?;

    if c2 == 0 {
        return Some(a);
    }
    if kind.is_logical() {
        if c2 >= bits {
            return Some(find_or_make_const(code, block, w, 0));
        }
    } else if c2 > bits - 1 {
        let clamped = find_or_make_const(code, block, w, bits - 1);
        return Some(new_value(code, block, Opcode::IntSar(w, a, clamped)));
    }

    let (inner_x, c1_id) = kind.matches(&code.instr(a).opcode)?;
    let c1 = const_value(code, c1_id)?;
    let sum = c1.saturating_add(c2);
    if kind.is_logical() {
        if sum >= bits {
            Some(find_or_make_const(code, block, w, 0))
        } else {
            let c = find_or_make_const(code, block, w, sum);
            Some(new_value(code, block, kind.rebuild(w, inner_x, c)))
        }
    } else {
        let clamped = sum.min(bits - 1);
        let c = find_or_make_const(code, block, w, clamped);
        Some(new_value(code, block, kind.rebuild(w, inner_x, c)))
    }
}

/// `(x ± c1) ± c2` collapses to a single `ADD`/`SUB` against the combined constant,
/// taking the sign of each operator into account (spec.md §4.4 "Additive
/// reassociation"). `outer_is_add` tells us whether the caller's own operator adds
/// or subtracts `delta` from `a`.
fn additive_reassociate(code: &mut CodeContainer, block: crate::ids::BlockId, w: IntWidth, a: InstrId, delta: u64, outer_is_add: bool) -> Option<InstrId> {
    match code.instr(a).opcode {
        Opcode::IntAdd(w2, x, c1_id) if w2 == w => {
            let c1 = const_value(code, c1_id)?;
            let combined = if outer_is_add { c1.wrapping_add(delta) } else { c1.wrapping_sub(delta) };
            let c = find_or_make_const(code, block, w, combined);
            Some(new_value(code, block, Opcode::IntAdd(w, x, c)))
        }
        Opcode::IntSub(w2, x, c1_id) if w2 == w => {
            let c1 = const_value(code, c1_id)?;
            let combined = if outer_is_add { c1.wrapping_sub(delta) } else { c1.wrapping_add(delta) };
            Some(if outer_is_add {
                // x - c1 + delta = x - (c1 - delta)
                let c = find_or_make_const(code, block, w, combined);
                new_value(code, block, Opcode::IntSub(w, x, c))
            } else {
                // x - c1 - delta = x - (c1 + delta)
                let c = find_or_make_const(code, block, w, c1.wrapping_add(delta));
                new_value(code, block, Opcode::IntSub(w, x, c))
            })
        }
        _ => None,
    }
}
