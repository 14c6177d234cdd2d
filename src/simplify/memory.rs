//! Copy-memory elision (spec.md §4.4):
//! a `COPY_MEMORY` into a local whose only producer is a just-preceding aggregate
//! `INVOKE`, or whose source is an argument copied nowhere else, redirects the
//! destination's uses to the source directly instead of materializing a second copy.

use std::ops::ControlFlow;

use crate::error::OptResult;
use crate::function::CodeContainer;
use crate::ids::InstrId;
use crate::instruction::Opcode;
use crate::introspect::{extract_inputs, get_sole_use};
use crate::simplify::replace_uses;
use crate::structure::CodeStructure;

/// Every instruction (other than `except`) anywhere in `code` that reads `target` as
/// an operand, phi links included.
fn other_uses(code: &CodeContainer, target: InstrId, except: InstrId) -> OptResult<Vec<InstrId>> {
    let mut uses = Vec::new();
    for candidate in code.instructions.iter().map(|i| i.id) {
        if candidate == except {
            continue;
        }
        extract_inputs(code, candidate, true, &mut |input| {
            if input == target {
                uses.push(candidate);
            }
            Ok(ControlFlow::Continue(()))
        })?;
    }
    Ok(uses)
}

/// `COPY_MEMORY(dst, src)` where `dst` is an `ALLOC_LOCAL` of the copy's type and
/// `src` is the result of an `INVOKE` returning through a `return_space` of the same
/// type: every other use of `dst` redirects to that `return_space`, and the copy (plus
/// the now-dead local) drops, provided the call is sequenced before each of those uses
/// (spec.md §4.4 "Copy-memory elision").
fn try_elide_invoke_copy(code: &mut CodeContainer, structure: &mut CodeStructure, instr: InstrId) -> OptResult<bool> {
    let (dst, src, type_id) = match code.instr(instr).opcode {
        Opcode::CopyMemory { dst, src, type_id } => (dst, src, type_id),
        _ => return Ok(false),
    };
    if !matches!(code.instr(dst).opcode, Opcode::AllocLocal(t) if t == type_id) {
        return Ok(false);
    }
    let call_id = match code.instr(src).opcode {
        Opcode::Invoke { call, .. } => call,
        _ => return Ok(false),
    };
    let return_space = code.call(call_id).return_space;
    if return_space.is_none() {
        return Ok(false);
    }

    for other in other_uses(code, dst, instr)? {
        if !structure.is_sequenced_before(code, src, other)? {
            return Ok(false);
        }
    }

    replace_uses(code, dst, return_space);
    code.drop_instruction(instr);
    code.drop_instruction(dst);
    log::debug!("elided copy-memory {instr}: local {dst} now aliases invoke {src}'s return space");
    Ok(true)
}

/// The symmetric rule: `COPY_MEMORY(dst, src)` where `src` is a `GET_ARGUMENT` of the
/// copy's type whose only use is this very copy, and every other use of `dst` is
/// sequenced after the copy: `dst` becomes an alias of the argument directly (spec.md
/// §4.4 "a symmetric rule elides the copy of a struct/union/array argument").
fn try_elide_argument_copy(code: &mut CodeContainer, structure: &mut CodeStructure, instr: InstrId) -> OptResult<bool> {
    let (dst, src, type_id) = match code.instr(instr).opcode {
        Opcode::CopyMemory { dst, src, type_id } => (dst, src, type_id),
        _ => return Ok(false),
    };
    if !matches!(code.instr(dst).opcode, Opcode::AllocLocal(t) if t == type_id) {
        return Ok(false);
    }
    if !matches!(code.instr(src).opcode, Opcode::GetArgument(_, t) if t == type_id) {
        return Ok(false);
    }
    if get_sole_use(code, src)? != Some(instr) {
        return Ok(false);
    }

    for other in other_uses(code, dst, instr)? {
        if !structure.is_sequenced_before(code, instr, other)? {
            return Ok(false);
        }
    }

    replace_uses(code, dst, src);
    code.drop_instruction(instr);
    code.drop_instruction(dst);
    log::debug!("elided copy-memory {instr}: local {dst} now aliases argument {src} directly");
    Ok(true)
}

/// Runs one sweep of copy-memory elision over `function`, using (and extending) the
/// sequenced-before cache in `structure`. Returns whether anything changed.
pub fn run(function: &mut crate::function::Function, structure: &mut CodeStructure) -> OptResult<bool> {
    let candidates: Vec<InstrId> = function
        .code
        .instructions
        .iter()
        .filter(|i| matches!(i.opcode, Opcode::CopyMemory { .. }))
        .map(|i| i.id)
        .collect();

    let mut changed = false;
    for instr in candidates {
        if try_elide_invoke_copy(&mut function.code, structure, instr)? {
            changed = true;
            continue;
        }
        if try_elide_argument_copy(&mut function.code, structure, instr)? {
            changed = true;
        }
    }
    Ok(changed)
}
