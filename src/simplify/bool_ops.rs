//! Boolean normalization, comparison fusion, and select folding (spec.md §4.4):
//! `BOOL_NOT` canonicalization, `BOOL_OR`/`BOOL_AND` fusions, and `SELECT`/
//! `SELECT_COMPARE` folding.

use crate::error::OptResult;
use crate::function::CodeContainer;
use crate::ids::InstrId;
use crate::instruction::Opcode;
use crate::simplify::{find_or_make_const, new_value};
use crate::value::{Comparison, IntWidth};

fn as_bool_const(code: &CodeContainer, id: InstrId) -> Option<bool> {
    match code.instr(id).opcode {
        Opcode::UIntConst(_, 0) => Some(false),
        Opcode::UIntConst(_, 1) => Some(true),
        _ => None,
    }
}

/// Whether `id` is already known to produce a 0/1 value: spec.md §4.4's "bool
/// producing" opcode set (`SCALAR_COMPARE`, the `BOOL_*` family, `*_TO_BOOL`, and
/// the literal constants 0/1).
pub(crate) fn is_bool_producing(code: &CodeContainer, id: InstrId) -> bool {
    matches!(
        code.instr(id).opcode,
        Opcode::ScalarCompare(..)
            | Opcode::BoolOr(..)
            | Opcode::BoolAnd(..)
            | Opcode::BoolNot(..)
            | Opcode::IntToBool(..)
            | Opcode::ToBool(..)
    ) || as_bool_const(code, id).is_some()
}

/// Produces a 0/1 value equivalent to `x`: reuses `x` directly if it is already
/// bool-producing, otherwise wraps it in an explicit `TO_BOOL` at `width` (spec.md
/// §4.4's "bool-canonicalized x").
fn canonical_bool(code: &mut CodeContainer, block: crate::ids::BlockId, width: IntWidth, x: InstrId) -> InstrId {
    if is_bool_producing(code, x) {
        x
    } else {
        new_value(code, block, Opcode::ToBool(width, x))
    }
}

pub fn try_simplify(code: &mut CodeContainer, instr: InstrId) -> OptResult<Option<InstrId>> {
    let block = code.instr(instr).block;
    let opcode = code.instr(instr).opcode;

    let result = match opcode {
        Opcode::BoolNot(w, x) => match code.instr(x).opcode {
            // BOOL_NOT(BOOL_NOT(x)) => bool-canonicalized x.
            Opcode::BoolNot(_, inner) => Some(canonical_bool(code, block, w, inner)),
            // BOOL_NOT(SCALAR_COMPARE(cmp,a,b)) => SCALAR_COMPARE(inverse(cmp),a,b).
            Opcode::ScalarCompare(cmp, a, b) => {
                Some(new_value(code, block, Opcode::ScalarCompare(cmp.inverse(), a, b)))
            }
            // Promote a NOT of an already bool-producing operand to the 8-bit
            // canonical width (spec.md §4.4 "Boolean normalization").
            _ if w != IntWidth::W8 && is_bool_producing(code, x) => {
                Some(new_value(code, block, Opcode::BoolNot(IntWidth::W8, x)))
            }
            _ => None,
        },

        Opcode::BoolOr(w, a, b) => {
            if a == b {
                Some(canonical_bool(code, block, w, a))
            } else if as_bool_const(code, a) == Some(true) || as_bool_const(code, b) == Some(true) {
                Some(find_or_make_const(code, block, w, 1))
            } else if as_bool_const(code, a) == Some(false) {
                Some(b)
            } else if as_bool_const(code, b) == Some(false) {
                Some(a)
            } else if both_bool_producing_narrowable(code, w, a, b) {
                Some(new_value(code, block, Opcode::BoolOr(IntWidth::W8, a, b)))
            } else if matches!(code.instr(b).opcode, Opcode::BoolOr(_, x, y) if x == a || y == a) {
                Some(b)
            } else if matches!(code.instr(a).opcode, Opcode::BoolOr(_, x, y) if x == b || y == b) {
                Some(a)
            } else if let Some(fused) = fuse_compare_pair(code, a, b) {
                Some(new_value(code, block, Opcode::ScalarCompare(fused.0, fused.1, fused.2)))
            } else {
                None
            }
        }

        Opcode::BoolAnd(w, a, b) => {
            if a == b {
                Some(canonical_bool(code, block, w, a))
            } else if as_bool_const(code, a) == Some(false) || as_bool_const(code, b) == Some(false) {
                Some(find_or_make_const(code, block, w, 0))
            } else if as_bool_const(code, a) == Some(true) {
                Some(b)
            } else if as_bool_const(code, b) == Some(true) {
                Some(a)
            } else if both_bool_producing_narrowable(code, w, a, b) {
                Some(new_value(code, block, Opcode::BoolAnd(IntWidth::W8, a, b)))
            } else if matches!(code.instr(b).opcode, Opcode::BoolAnd(_, x, y) if x == a || y == a) {
                Some(b)
            } else if matches!(code.instr(a).opcode, Opcode::BoolAnd(_, x, y) if x == b || y == b) {
                Some(a)
            } else {
                None
            }
        }

        // INTn_TO_BOOL(bool_producing) ⇒ the argument (spec.md §4.4).
        Opcode::IntToBool(_, x) | Opcode::ToBool(_, x) => {
            if is_bool_producing(code, x) {
                Some(x)
            } else {
                None
            }
        }

        Opcode::Select { condition, on_true, on_false } => match as_bool_const(code, condition) {
            Some(true) => Some(on_true),
            Some(false) => Some(on_false),
            None if on_true == on_false => Some(on_true),
            None if condition == on_true && is_bool_producing(code, condition) && is_bool_producing(code, on_false) => {
                Some(new_value(code, block, Opcode::BoolOr(IntWidth::W8, condition, on_false)))
            }
            None if condition == on_false && is_bool_producing(code, condition) && is_bool_producing(code, on_true) => {
                Some(new_value(code, block, Opcode::BoolAnd(IntWidth::W8, condition, on_true)))
            }
            None => None,
        },

        Opcode::SelectCompare { cmp, lhs, rhs, on_true, on_false } => {
            if lhs == rhs {
                None
            } else if on_true == on_false {
                Some(on_true)
            } else if let Opcode::ScalarCompare(cmp_prime, a2, b2) = code.instr(on_true).opcode {
                if a2 == lhs && b2 == rhs && is_bool_producing(code, on_false) {
                    if cmp_prime == cmp.inverse() {
                        Some(new_value(code, block, Opcode::BoolAnd(IntWidth::W8, on_true, on_false)))
                    } else if cmp_prime == cmp {
                        Some(new_value(code, block, Opcode::BoolOr(IntWidth::W8, on_true, on_false)))
                    } else {
                        None
                    }
                } else {
                    None
                }
            } else {
                None
            }
        }

        _ => None,
    };

    Ok(result)
}

/// Both operands already bool-producing but at a width other than the canonical
/// 8-bit one: collapse the `BOOL_OR`/`BOOL_AND` down to 8-bit (spec.md §4.4).
fn both_bool_producing_narrowable(code: &CodeContainer, w: IntWidth, a: InstrId, b: InstrId) -> bool {
    w != IntWidth::W8 && is_bool_producing(code, a) && is_bool_producing(code, b)
}

/// `(a < b) OR (a == b) ⇒ a ≤ b` and its signed/unsigned/float, strict-direction,
/// and operand-order variants (spec.md §4.4 "Comparison fusion").
fn fuse_compare_pair(code: &CodeContainer, a: InstrId, b: InstrId) -> Option<(Comparison, InstrId, InstrId)> {
    let (c1, x1, y1) = match code.instr(a).opcode {
        Opcode::ScalarCompare(c, x, y) => (c, x, y),
        _ => return None,
    };
    let (c2, x2, y2) = match code.instr(b).opcode {
        Opcode::ScalarCompare(c, x, y) => (c, x, y),
        _ => return None,
    };
    if x1 != x2 || y1 != y2 {
        return None;
    }
    if !c1.is_strict_to_non_strict_pair_with(c2) {
        return None;
    }
    let strict = if c1 == Comparison::Equal { c2 } else { c1 };
    strict.widen_to_or_equal().map(|fused| (fused, x1, y1))
}
