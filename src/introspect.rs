//! Instruction introspection (spec.md §4.1): a single generic walk over an
//! instruction's operand refs, shared by the simplifier, the surgery helpers, and the
//! tail-call escape analysis instead of each hand-rolling its own match.

use std::ops::ControlFlow;

use crate::error::OptResult;
use crate::function::CodeContainer;
use crate::ids::InstrId;
use crate::instruction::Opcode;

/// Visits every instruction-ref operand of `instr`, in a fixed left-to-right order
/// matching the field order in `instruction.rs`. When `instr` is a `PHI` and
/// `resolve_phi` is true, the phi's own links are visited instead of treating the phi
/// as an opaque zero-input node (spec.md §4.1: "resolve_phi controls whether a PHI's
/// own inputs are exposed, or the phi is treated as an opaque producer").
///
/// `visit` returning `ControlFlow::Break(())` stops the walk early without being an
/// error — this is the Rust rendition of the "positive YIELD signal" spec.md §7 calls
/// out; real failures are reported through the `Result` instead.
pub fn extract_inputs(
    code: &CodeContainer,
    instr: InstrId,
    resolve_phi: bool,
    visit: &mut dyn FnMut(InstrId) -> OptResult<ControlFlow<()>>,
) -> OptResult<ControlFlow<()>> {
    macro_rules! step {
        ($r:expr) => {
            if $r.is_some() {
                if let ControlFlow::Break(()) = visit($r)? {
                    return Ok(ControlFlow::Break(()));
                }
            }
        };
    }

    let opcode = code.instr(instr).opcode;
    match opcode {
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
        | Opcode::Jump { .. } => {}

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
        | Opcode::Return(x) => {
            step!(x);
        }

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
            step!(a);
            step!(b);
        }

        Opcode::IntDiv { lhs: a, rhs: b, .. } => {
            step!(a);
            step!(b);
        }

        Opcode::RefLocal { offset, .. }
        | Opcode::GlobalOffset { offset, .. }
        | Opcode::ThreadLocalOffset { offset, .. } => {
            step!(offset);
        }

        Opcode::CopyMemory { dst, src, .. } => {
            step!(dst);
            step!(src);
        }

        Opcode::BitIntExtract { base, offset_ref, .. } => {
            step!(base);
            step!(offset_ref);
        }
        Opcode::BitIntInsert { base, value, offset_ref } => {
            step!(base);
            step!(value);
            step!(offset_ref);
        }

        Opcode::Select { condition, on_true, on_false } => {
            step!(condition);
            step!(on_true);
            step!(on_false);
        }
        Opcode::BitfieldInsert { base, value, .. } => {
            step!(base);
            step!(value);
        }
        Opcode::SelectCompare { lhs, rhs, on_true, on_false, .. } => {
            step!(lhs);
            step!(rhs);
            step!(on_true);
            step!(on_false);
        }

        Opcode::Store { addr, value, .. } => {
            step!(addr);
            step!(value);
        }
        Opcode::Load { addr, .. } => {
            step!(addr);
        }

        Opcode::StackAlloc { alignment, size } => {
            step!(alignment);
            step!(size);
        }

        Opcode::Branch { condition, .. } => {
            step!(condition);
        }
        Opcode::BranchCompare { lhs, rhs, .. } => {
            step!(lhs);
            step!(rhs);
        }

        Opcode::OverflowArith { lhs, rhs, result_space, .. } => {
            step!(lhs);
            step!(rhs);
            step!(result_space);
        }

        Opcode::AtomicStore { addr, value, .. } => {
            step!(addr);
            step!(value);
        }
        Opcode::AtomicCmpxchg { addr, expected, desired, .. } => {
            step!(addr);
            step!(expected);
            step!(desired);
        }

        Opcode::Invoke { indirect, call, .. } => {
            step!(indirect);
            for &arg in &code.call(call).arguments {
                step!(arg);
            }
            step!(code.call(call).return_space);
        }
        Opcode::TailInvoke { call, .. } => {
            for &arg in &code.call(call).arguments {
                step!(arg);
            }
            step!(code.call(call).return_space);
        }

        Opcode::Phi(phi_id) => {
            if resolve_phi {
                for (_, &value) in &code.phi(phi_id).links {
                    step!(value);
                }
            }
        }

        Opcode::InlineAssembly(asm_id) => {
            for param in &code.inline_asm(asm_id).parameters {
                step!(param.read_ref);
                step!(param.load_store_ref);
            }
        }

        Opcode::VarargGet { args, .. } => {
            step!(args);
        }
    }

    Ok(ControlFlow::Continue(()))
}

/// Terminators and other instructions whose position within the control-flow
/// subsequence is load-bearing (spec.md §4.1: `is_control_flow`).
pub fn is_control_flow(opcode: &Opcode) -> bool {
    opcode.is_terminator()
        || matches!(
            opcode,
            Opcode::Invoke { .. }
                | Opcode::Store { .. }
                | Opcode::AtomicStore { .. }
                | Opcode::AtomicCmpxchg { .. }
                | Opcode::CopyMemory { .. }
                | Opcode::ScopePush
                | Opcode::ScopePop
                | Opcode::StackAlloc { .. }
                | Opcode::LocalLifetimeMark
                | Opcode::FenvSave
                | Opcode::FenvClear
                | Opcode::FenvUpdate(..)
                | Opcode::VarargStart(..)
                | Opcode::VarargEnd(..)
                | Opcode::VarargGet { .. }
        )
}

/// Pure, rematerializable instructions that carry no state and may be freely
/// duplicated, reordered with respect to other side-effect-free instructions, or
/// dropped when unused (spec.md §4.1: `is_side_effect_free`). The set is closed and
/// explicit, not derived from `is_control_flow` — `kefir_opt_instruction_is_side_effect_free`
/// enumerates constants, bool ops, extends, scalar compare, integer arithmetic,
/// bitwise ops, shifts, and `int_not`, and falls through to `false` for everything
/// else (loads included: a non-volatile load can still fault, and `overflow_arith`,
/// `bitint_extract`/`bitint_insert`, and `vararg_get` all read or write state this
/// crate doesn't model well enough to prove pure). Floating-point arithmetic is also
/// excluded: it can raise exceptions into the floating-point environment that
/// `fenv_save`/`fenv_clear`/`fenv_update` make an explicit, control-flow-relevant part
/// of this IR.
pub fn is_side_effect_free(opcode: &Opcode) -> bool {
    matches!(
        opcode,
        Opcode::UIntConst(..)
            | Opcode::FloatConst(..)
            | Opcode::BlockLabel(..)
            | Opcode::IntToBool(..)
            | Opcode::ToBool(..)
            | Opcode::IntExtend { .. }
            | Opcode::ScalarCompare(..)
            | Opcode::BoolNot(..)
            | Opcode::BoolOr(..)
            | Opcode::BoolAnd(..)
            | Opcode::IntAdd(..)
            | Opcode::IntSub(..)
            | Opcode::IntMul(..)
            | Opcode::IntAnd(..)
            | Opcode::IntOr(..)
            | Opcode::IntXor(..)
            | Opcode::IntShl(..)
            | Opcode::IntShr(..)
            | Opcode::IntSar(..)
            | Opcode::IntNot(..)
    )
}


/// The unique instruction that consumes `instr`'s result, if it has exactly one use
/// (spec.md §4.1: `get_sole_use`, used by the tail-call promoter to confirm an
/// `INVOKE`'s only consumer is the `RETURN` that follows it).
pub fn get_sole_use(code: &CodeContainer, instr: InstrId) -> OptResult<Option<InstrId>> {
    let mut sole = None;
    for candidate in code.instructions.iter().map(|i| i.id) {
        let mut found = false;
        extract_inputs(code, candidate, false, &mut |input| {
            if input == instr {
                found = true;
            }
            Ok(ControlFlow::Continue(()))
        })?;
        if found {
            if sole.is_some() {
                return Ok(None);
            }
            sole = Some(candidate);
        }
    }
    for phi in &code.phis {
        if phi.links.values().any(|&v| v == instr) {
            return Ok(None);
        }
    }
    Ok(sole)
}
