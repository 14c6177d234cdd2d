//! Terminator folding and the unreachable backward sweep (spec.md §4.4): branch
//! and branch-compare simplification, plus the `UNREACHABLE` marker-trail cleanup.

use crate::error::OptResult;
use crate::function::CodeContainer;
use crate::ids::{BlockId, InstrId};
use crate::instruction::Opcode;
use crate::value::{BranchVariant, Comparison};

fn bool_const(code: &CodeContainer, id: InstrId) -> Option<bool> {
    match code.instr(id).opcode {
        Opcode::UIntConst(_, 0) => Some(false),
        Opcode::UIntConst(_, v) if v != 0 => Some(true),
        _ => None,
    }
}

fn int_const(code: &CodeContainer, id: InstrId) -> Option<(crate::value::IntWidth, u64)> {
    match code.instr(id).opcode {
        Opcode::UIntConst(w, v) => Some((w, v)),
        _ => None,
    }
}

fn evaluate_comparison(cmp: Comparison, width: crate::value::IntWidth, a: u64, b: u64) -> bool {
    use Comparison::*;
    match cmp {
        Equal => a == b,
        NotEqual => a != b,
        UnsignedLess => a < b,
        UnsignedLessOrEqual => a <= b,
        UnsignedGreater => a > b,
        UnsignedGreaterOrEqual => a >= b,
        SignedLess => width.sign_extend(a) < width.sign_extend(b),
        SignedLessOrEqual => width.sign_extend(a) <= width.sign_extend(b),
        SignedGreater => width.sign_extend(a) > width.sign_extend(b),
        SignedGreaterOrEqual => width.sign_extend(a) >= width.sign_extend(b),
        // Float-ordered comparisons never fold from raw integer bit patterns here;
        // they are left for a float-aware rewrite this crate does not implement.
        FloatOrderedLess | FloatOrderedLessOrEqual | FloatOrderedGreater | FloatOrderedGreaterOrEqual
        | FloatOrderedEqual | FloatOrderedNotEqual => false,
    }
}

fn resolved_target(taken: bool, variant: BranchVariant, target: BlockId, alt: BlockId) -> BlockId {
    let goes_to_target = match variant {
        BranchVariant::Normal => taken,
        BranchVariant::Inverted => !taken,
    };
    if goes_to_target {
        target
    } else {
        alt
    }
}

/// Peels away `BOOL_NOT` wrappers around a `BRANCH` condition, flipping the branch
/// variant once per peel (spec.md §4.4 "Branch condition fusion" — `BRANCH(NOT(c),
/// t, a, v)` reduces to `BRANCH(c, t, a, flip(v))`, exposing whatever produced `c`
/// for the `SCALAR_COMPARE` fusion below).
fn peel_bool_not(code: &CodeContainer, mut condition: InstrId, mut variant: BranchVariant) -> (InstrId, BranchVariant) {
    while let Opcode::BoolNot(_, inner) = code.instr(condition).opcode {
        condition = inner;
        variant = variant.flip();
    }
    (condition, variant)
}

/// Whether `block` is nothing more than bookkeeping markers followed by an
/// `UNREACHABLE` terminator — trivially dead no matter how control reaches it
/// (spec.md §4.4 "unreachable-arm folding").
fn is_trivially_unreachable(code: &CodeContainer, block: BlockId) -> bool {
    let tail = code.control_tail_of(block);
    if tail.is_none() || !matches!(code.instr(tail).opcode, Opcode::Unreachable) {
        return false;
    }
    let mut cursor = code.block(block).control_head;
    while cursor != tail {
        if cursor.is_none() {
            return false;
        }
        if !matches!(
            code.instr(cursor).opcode,
            Opcode::ScopePush | Opcode::ScopePop | Opcode::LocalLifetimeMark | Opcode::FenvSave | Opcode::FenvClear
        ) {
            return false;
        }
        cursor = code.instr(cursor).control_next;
    }
    true
}

/// Replays `from`'s marker trail (everything preceding its `UNREACHABLE`) onto the
/// end of `into`'s instruction and control-flow chains, preserving order. Called
/// right before a branch that used to lead into `from` collapses to an unconditional
/// jump around it, so `from`'s otherwise-unobservable side effects aren't lost.
fn replay_marker_trail(code: &mut CodeContainer, from: BlockId, into: BlockId) {
    let tail = code.control_tail_of(from);
    let mut opcodes = Vec::new();
    let mut cursor = code.block(from).control_head;
    while cursor != tail {
        opcodes.push(code.instr(cursor).opcode);
        cursor = code.instr(cursor).control_next;
    }
    for opcode in opcodes {
        let id = code.push_instruction(crate::instruction::Instruction::new(InstrId::NONE, into, opcode));
        code.append_control(id);
    }
}

/// Folds a `BRANCH`/`BRANCH_COMPARE` whose two arms are identical, whose condition is
/// statically known, or whose condition fuses with the instruction that produced it
/// into a plain `JUMP`; also folds away an arm that is itself trivially unreachable.
/// Terminators have no uses to redirect (nothing reads a branch's "result"), so each
/// case here rewrites the opcode in place.
pub fn simplify_terminators(code: &mut CodeContainer) -> OptResult<bool> {
    let mut changed = false;
    let tails: Vec<InstrId> = code.blocks.iter().map(|b| b.control_tail).collect();
    for tail in tails {
        if tail.is_none() {
            continue;
        }

        let current_block = code.instr(tail).block;
        let new_opcode = match code.instr(tail).opcode {
            Opcode::Branch { condition, target, alt, variant } => {
                if target == alt {
                    Some(Opcode::Jump { target })
                } else if let Some(taken) = bool_const(code, condition) {
                    Some(Opcode::Jump { target: resolved_target(taken, variant, target, alt) })
                } else {
                    let (peeled, peeled_variant) = peel_bool_not(code, condition, variant);
                    if let Opcode::ScalarCompare(cmp, lhs, rhs) = code.instr(peeled).opcode {
                        Some(Opcode::BranchCompare { cmp, lhs, rhs, target, alt, variant: peeled_variant })
                    } else if is_trivially_unreachable(code, target) {
                        replay_marker_trail(code, target, current_block);
                        Some(Opcode::Jump { target: alt })
                    } else if is_trivially_unreachable(code, alt) {
                        replay_marker_trail(code, alt, current_block);
                        Some(Opcode::Jump { target })
                    } else {
                        None
                    }
                }
            }

            Opcode::BranchCompare { cmp, lhs, rhs, target, alt, variant } => {
                if target == alt {
                    Some(Opcode::Jump { target })
                } else {
                    match (int_const(code, lhs), int_const(code, rhs)) {
                        (Some((w, a)), Some((_, b))) => {
                            let taken = evaluate_comparison(cmp, w, a, b);
                            Some(Opcode::Jump { target: resolved_target(taken, variant, target, alt) })
                        }
                        _ if is_trivially_unreachable(code, target) => {
                            replay_marker_trail(code, target, current_block);
                            Some(Opcode::Jump { target: alt })
                        }
                        _ if is_trivially_unreachable(code, alt) => {
                            replay_marker_trail(code, alt, current_block);
                            Some(Opcode::Jump { target })
                        }
                        _ => None,
                    }
                }
            }

            _ => None,
        };

        if let Some(opcode) = new_opcode {
            log::trace!("folded terminator {tail} to an unconditional jump");
            code.instr_mut(tail).opcode = opcode;
            changed = true;
        }
    }
    Ok(changed)
}

/// Drops pure bookkeeping instructions (scope markers, lifetime marks, floating-point
/// environment saves) that immediately precede an `UNREACHABLE` terminator: once
/// control cannot proceed past this point, their effects are unobservable.
/// Instructions with a potentially externally visible effect (stores, calls) are left
/// alone even here.
pub fn sweep_unreachable(code: &mut CodeContainer) -> OptResult<usize> {
    let mut dropped = 0;
    let block_ids: Vec<_> = code.blocks.iter().map(|b| b.id).collect();
    for block_id in block_ids {
        if !matches!(code.instr(code.block(block_id).control_tail).opcode, Opcode::Unreachable) {
            continue;
        }
        loop {
            let tail = code.block(block_id).control_tail;
            let candidate = code.instr(tail).control_prev;
            if candidate.is_none() {
                break;
            }
            let removable = matches!(
                code.instr(candidate).opcode,
                Opcode::ScopePush
                    | Opcode::ScopePop
                    | Opcode::LocalLifetimeMark
                    | Opcode::FenvSave
                    | Opcode::FenvClear
                    | Opcode::VarargStart(..)
                    | Opcode::VarargEnd(..)
            );
            if !removable {
                break;
            }
            code.drop_instruction(candidate);
            dropped += 1;
        }
    }
    if dropped > 0 {
        log::debug!("unreachable sweep: dropped {dropped} dead bookkeeping instructions");
    }
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{new_function, push, push_value};

    #[test]
    fn branch_with_identical_arms_folds_to_an_unconditional_jump() {
        let mut function = new_function();
        let block = function.code.new_block();
        let t = function.code.new_block();
        let cond = push_value(&mut function.code, block, Opcode::GetArgument(0, crate::ids::TypeId(0)));
        let branch = push(&mut function.code, block, Opcode::Branch {
            condition: cond,
            target: t,
            alt: t,
            variant: BranchVariant::Normal,
        });

        let changed = simplify_terminators(&mut function.code).unwrap();
        assert!(changed);
        assert_eq!(function.code.instr(branch).opcode, Opcode::Jump { target: t });
    }

    #[test]
    fn branch_with_a_constant_condition_resolves_to_its_taken_target() {
        let mut function = new_function();
        let block = function.code.new_block();
        let t = function.code.new_block();
        let e = function.code.new_block();
        let cond = push_value(&mut function.code, block, Opcode::UIntConst(crate::value::IntWidth::W8, 1));
        let branch = push(&mut function.code, block, Opcode::Branch {
            condition: cond,
            target: t,
            alt: e,
            variant: BranchVariant::Inverted,
        });

        simplify_terminators(&mut function.code).unwrap();
        // A truthy condition with an inverted variant takes the `alt` arm.
        assert_eq!(function.code.instr(branch).opcode, Opcode::Jump { target: e });
    }

    #[test]
    fn branch_compare_with_constant_operands_folds_to_the_evaluated_target() {
        let mut function = new_function();
        let block = function.code.new_block();
        let t = function.code.new_block();
        let e = function.code.new_block();
        let lhs = push_value(&mut function.code, block, Opcode::UIntConst(crate::value::IntWidth::W32, 5));
        let rhs = push_value(&mut function.code, block, Opcode::UIntConst(crate::value::IntWidth::W32, 3));
        let branch = push(&mut function.code, block, Opcode::BranchCompare {
            cmp: Comparison::UnsignedGreater,
            lhs,
            rhs,
            target: t,
            alt: e,
            variant: BranchVariant::Normal,
        });

        simplify_terminators(&mut function.code).unwrap();
        assert_eq!(function.code.instr(branch).opcode, Opcode::Jump { target: t });
    }

    #[test]
    fn a_trivially_unreachable_arm_is_folded_away() {
        let mut function = new_function();
        let block = function.code.new_block();
        let dead = function.code.new_block();
        let alive = function.code.new_block();
        push(&mut function.code, dead, Opcode::ScopePop);
        push(&mut function.code, dead, Opcode::Unreachable);

        let cond = push_value(&mut function.code, block, Opcode::GetArgument(0, crate::ids::TypeId(0)));
        let branch = push(&mut function.code, block, Opcode::Branch {
            condition: cond,
            target: dead,
            alt: alive,
            variant: BranchVariant::Normal,
        });

        simplify_terminators(&mut function.code).unwrap();
        assert_eq!(function.code.instr(branch).opcode, Opcode::Jump { target: alive });
        // the dead block's marker trail was replayed into `block` before the fold.
        let new_tail = function.code.block(block).control_tail;
        assert_ne!(new_tail, branch);
        assert!(matches!(function.code.instr(new_tail).opcode, Opcode::ScopePop));
    }

    #[test]
    fn sweep_unreachable_drops_bookkeeping_but_keeps_side_effects() {
        let mut function = new_function();
        let markers_block = function.code.new_block();
        push(&mut function.code, markers_block, Opcode::ScopePush);
        push(&mut function.code, markers_block, Opcode::LocalLifetimeMark);
        let unreachable = push(&mut function.code, markers_block, Opcode::Unreachable);

        let dropped = sweep_unreachable(&mut function.code).unwrap();
        assert_eq!(dropped, 2);
        assert_eq!(function.code.block(markers_block).control_head, unreachable);

        let store_block = function.code.new_block();
        let addr = push_value(&mut function.code, store_block, Opcode::GetArgument(0, crate::ids::TypeId(0)));
        push(&mut function.code, store_block, Opcode::Store {
            width: crate::instruction::MemWidth::Int(crate::value::IntWidth::W32),
            addr,
            value: addr,
            flags: Default::default(),
        });
        push(&mut function.code, store_block, Opcode::Unreachable);
        let dropped = sweep_unreachable(&mut function.code).unwrap();
        assert_eq!(dropped, 0);
    }
}
