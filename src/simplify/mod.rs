//! The peephole/algebraic simplifier (spec.md §4.4): a one-directional, terminating
//! fixpoint over guarded rewrite rules, one large per-opcode table of local rewrites.
//! Unlike an e-graph, no alternate forms are kept around for later comparison — each
//! rule either fires (replacing one instruction's uses with another, already-simpler
//! instruction) or doesn't, and the engine keeps sweeping until a full pass makes no
//! change.

mod arith;
mod bool_ops;
mod control;
mod memory;
mod phi_select;

use indexmap::IndexSet;

use crate::error::OptResult;
use crate::function::{CodeContainer, Function};
use crate::ids::InstrId;
use crate::instruction::{Instruction, Opcode};
use crate::structure::CodeStructure;

/// Replaces every operand slot across the function that currently names `old` with
/// `new`: other instructions' opcode fields, call argument/return-space refs, phi
/// links, and inline-assembly parameter refs. Mirrors `introspect::extract_inputs`'s
/// shape-by-shape coverage, but as a write instead of a read.
pub(crate) fn replace_uses(code: &mut CodeContainer, old: InstrId, new: InstrId) {
    #[inline]
    fn sub(slot: &mut InstrId, old: InstrId, new: InstrId) {
        if *slot == old {
            *slot = new;
        }
    }

    for i in 0..code.instructions.len() {
        let opcode = &mut code.instructions[i].opcode;
        match opcode {
            Opcode::BoolNot(_, x)
            | Opcode::IntNot(_, x)
            | Opcode::IntToBool(_, x)
            | Opcode::ToBool(_, x)
            | Opcode::FloatNeg(_, x)
            | Opcode::IntToFloat { operand: x, .. }
            | Opcode::FloatToInt { operand: x, .. }
            | Opcode::FloatConvert { operand: x, .. }
            | Opcode::IntExtend { operand: x, .. }
            | Opcode::BitIntCast { operand: x, .. }
            | Opcode::BitfieldExtract { base: x, .. }
            | Opcode::FenvUpdate(x)
            | Opcode::IJump(x)
            | Opcode::VarargStart(x)
            | Opcode::VarargEnd(x)
            | Opcode::Return(x) => sub(x, old, new),

            Opcode::BoolOr(_, a, b)
            | Opcode::BoolAnd(_, a, b)
            | Opcode::IntAnd(_, a, b)
            | Opcode::IntOr(_, a, b)
            | Opcode::IntXor(_, a, b)
            | Opcode::IntAdd(_, a, b)
            | Opcode::IntSub(_, a, b)
            | Opcode::IntMul(_, a, b)
            | Opcode::IntShl(_, a, b)
            | Opcode::IntShr(_, a, b)
            | Opcode::IntSar(_, a, b)
            | Opcode::FloatArith(_, _, a, b)
            | Opcode::ScalarCompare(_, a, b) => {
                sub(a, old, new);
                sub(b, old, new);
            }

            Opcode::IntDiv { lhs, rhs, .. } => {
                sub(lhs, old, new);
                sub(rhs, old, new);
            }

            Opcode::RefLocal { offset, .. }
            | Opcode::GlobalOffset { offset, .. }
            | Opcode::ThreadLocalOffset { offset, .. } => sub(offset, old, new),

            Opcode::CopyMemory { dst, src, .. } => {
                sub(dst, old, new);
                sub(src, old, new);
            }

            Opcode::BitIntExtract { base, offset_ref, .. } => {
                sub(base, old, new);
                sub(offset_ref, old, new);
            }
            Opcode::BitIntInsert { base, value, offset_ref } => {
                sub(base, old, new);
                sub(value, old, new);
                sub(offset_ref, old, new);
            }

            Opcode::Select { condition, on_true, on_false } => {
                sub(condition, old, new);
                sub(on_true, old, new);
                sub(on_false, old, new);
            }
            Opcode::BitfieldInsert { base, value, .. } => {
                sub(base, old, new);
                sub(value, old, new);
            }
            Opcode::SelectCompare { lhs, rhs, on_true, on_false, .. } => {
                sub(lhs, old, new);
                sub(rhs, old, new);
                sub(on_true, old, new);
                sub(on_false, old, new);
            }

            Opcode::Store { addr, value, .. } => {
                sub(addr, old, new);
                sub(value, old, new);
            }
            Opcode::Load { addr, .. } => sub(addr, old, new),

            Opcode::StackAlloc { alignment, size } => {
                sub(alignment, old, new);
                sub(size, old, new);
            }

            Opcode::Branch { condition, .. } => sub(condition, old, new),
            Opcode::BranchCompare { lhs, rhs, .. } => {
                sub(lhs, old, new);
                sub(rhs, old, new);
            }

            Opcode::OverflowArith { lhs, rhs, result_space, .. } => {
                sub(lhs, old, new);
                sub(rhs, old, new);
                sub(result_space, old, new);
            }

            Opcode::AtomicStore { addr, value, .. } => {
                sub(addr, old, new);
                sub(value, old, new);
            }
            Opcode::AtomicCmpxchg { addr, expected, desired, .. } => {
                sub(addr, old, new);
                sub(expected, old, new);
                sub(desired, old, new);
            }

            Opcode::VarargGet { args, .. } => sub(args, old, new),

            Opcode::UIntConst(..)
            | Opcode::FloatConst(..)
            | Opcode::BlockLabel(..)
            | Opcode::GetArgument(..)
            | Opcode::GetGlobal(..)
            | Opcode::GetThreadLocal(..)
            | Opcode::AllocLocal(..)
            | Opcode::Nop
            | Opcode::ScopePush
            | Opcode::ScopePop
            | Opcode::LocalLifetimeMark
            | Opcode::FenvSave
            | Opcode::FenvClear
            | Opcode::Unreachable
            | Opcode::Jump { .. }
            | Opcode::Invoke { .. }
            | Opcode::TailInvoke { .. }
            | Opcode::Phi(..)
            | Opcode::InlineAssembly(..) => {}
        }
    }

    for call in &mut code.calls {
        sub(&mut call.indirect, old, new);
        sub(&mut call.return_space, old, new);
        for arg in &mut call.arguments {
            sub(arg, old, new);
        }
    }
    for phi in &mut code.phis {
        for value in phi.links.values_mut() {
            sub(value, old, new);
        }
    }
    for asm in &mut code.inline_asm {
        for param in &mut asm.parameters {
            sub(&mut param.read_ref, old, new);
            sub(&mut param.load_store_ref, old, new);
        }
    }
}

/// Appends a brand-new instruction to `block` without touching the control-flow
/// chain — used when a rule needs a fresh constant or a fused instruction rather than
/// reusing an existing operand.
pub(crate) fn new_value(code: &mut CodeContainer, block: crate::ids::BlockId, opcode: Opcode) -> InstrId {
    code.push_instruction(Instruction::new(InstrId::NONE, block, opcode))
}

/// One sweep's verdict for a single instruction: either leave it alone, or replace
/// every use of it with `InstrId` (an existing operand, or a freshly created, simpler
/// instruction).
pub(crate) enum Verdict {
    Unchanged,
    ReplaceWith(InstrId),
}

fn simplify_one(code: &mut CodeContainer, instr: InstrId) -> OptResult<Verdict> {
    if let Some(v) = arith::try_simplify(code, instr)? {
        return Ok(Verdict::ReplaceWith(v));
    }
    if let Some(v) = bool_ops::try_simplify(code, instr)? {
        return Ok(Verdict::ReplaceWith(v));
    }
    Ok(Verdict::Unchanged)
}

/// Runs the simplifier to a fixpoint over every instruction in `function`, then sweeps
/// terminators (constant branch folding) and unreachable blocks. Returns the number of
/// rewrites applied, for the caller's pass statistics.
pub fn run(function: &mut Function) -> OptResult<usize> {
    let mut total = 0usize;
    loop {
        let mut changed = false;
        let ids: Vec<InstrId> = function.code.instructions.iter().map(|i| i.id).collect();
        for id in ids {
            if id.index() >= function.code.instructions.len() {
                continue; // dropped by an earlier rewrite this sweep
            }
            match simplify_one(&mut function.code, id)? {
                Verdict::Unchanged => {}
                Verdict::ReplaceWith(replacement) => {
                    replace_uses(&mut function.code, id, replacement);
                    total += 1;
                    changed = true;
                }
            }
        }
        changed |= control::simplify_terminators(&mut function.code)?;

        // Phi-to-select and copy-memory elision both need structural information
        // (dominators, sequenced-before) that the terminator folding above can have
        // just invalidated; rebuild once per sweep rather than threading incremental
        // updates through every other rewrite rule.
        let mut structure = CodeStructure::build(&function.code)?;
        changed |= phi_select::run(function, &structure)?;
        changed |= memory::run(function, &mut structure)?;

        if !changed {
            break;
        }
    }
    control::sweep_unreachable(&mut function.code)?;
    log::debug!("op-simplify: {total} rewrites applied");
    Ok(total)
}

/// Folds a `UIntConst` with a known width/value, returning its id if an identical
/// constant already exists in the block (cheap local CSE so the fixpoint doesn't keep
/// minting duplicate constants each sweep).
pub(crate) fn find_or_make_const(code: &mut CodeContainer, block: crate::ids::BlockId, width: crate::value::IntWidth, value: u64) -> InstrId {
    let value = width.truncate(value);
    let existing = code
        .instructions
        .iter()
        .find(|i| i.block == block && matches!(i.opcode, Opcode::UIntConst(w, v) if w == width && v == value))
        .map(|i| i.id);
    existing.unwrap_or_else(|| new_value(code, block, Opcode::UIntConst(width, value)))
}

pub(crate) type Seen = IndexSet<InstrId>;
