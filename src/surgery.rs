//! Block and instruction surgery (spec.md §4.3): the primitives the simplifier and
//! tail-call promoter use to rewrite the IR — tracing, merging blocks, redirecting
//! phi links, splitting blocks, and moving an instruction alongside its local
//! dependencies.

use std::collections::HashSet;
use std::ops::ControlFlow;

use crate::error::{OptError, OptResult};
use crate::function::CodeContainer;
use crate::ids::{BlockId, InstrId};
use crate::instruction::{Instruction, Opcode};
use crate::introspect::{extract_inputs, is_control_flow, is_side_effect_free};
use crate::structure::CodeStructure;

/// A caller-supplied waiver for the external-use-dominance check
/// `can_move_with_local_dependencies` otherwise applies to every remaining use of a
/// moved instruction (spec.md §4.3 `ignore_use_policy`) — takes `(def, use)` and
/// returns whether that particular use may be disregarded, e.g. because the caller
/// is about to delete it along with the value being moved.
pub type IgnoreUse<'a> = dyn Fn(InstrId, InstrId) -> bool + 'a;

/// Visits every instruction in `code`, in ascending id order — a single deterministic
/// walk over the whole container (SPEC_FULL.md §3).
pub fn trace(code: &CodeContainer, mut visit: impl FnMut(InstrId)) {
    for instr in &code.instructions {
        visit(instr.id);
    }
}

/// Merges `from` into `to`: appends `from`'s instruction and control-flow chains to
/// `to`'s, then redirects every successor's phi links that named `from` to name `to`
/// instead. Requires `to` to be `from`'s sole predecessor merge target — callers
/// check that via `CodeStructure` before calling this (spec.md §4.3: "block merging
/// is only valid when the edge is the unique edge between the two blocks").
pub fn merge_into(code: &mut CodeContainer, to: BlockId, from: BlockId) -> OptResult<()> {
    if to == from {
        return Err(OptError::InvalidRequest("cannot merge a block into itself"));
    }

    let from_head = code.block(from).instr_head;
    let from_control_head = code.block(from).control_head;

    if from_head.is_some() {
        let to_tail = code.block(to).instr_tail;
        if to_tail.is_some() {
            code.block_mut(to).instr_tail = code.block(from).instr_tail;
        } else {
            code.block_mut(to).instr_head = from_head;
            code.block_mut(to).instr_tail = code.block(from).instr_tail;
        }
        let mut cursor = from_head;
        while cursor.is_some() {
            code.instr_mut(cursor).block = to;
            cursor = code.instr(cursor).control_next;
        }
    }

    if from_control_head.is_some() {
        let to_control_tail = code.block(to).control_tail;
        if to_control_tail.is_some() {
            code.instr_mut(to_control_tail).control_next = from_control_head;
            code.instr_mut(from_control_head).control_prev = to_control_tail;
        } else {
            code.block_mut(to).control_head = from_control_head;
        }
        code.block_mut(to).control_tail = code.block(from).control_tail;
    }

    let from_phis = code.block(from).phi_ids.clone();
    for phi_id in &from_phis {
        code.phi_mut(*phi_id).owner_block = to;
    }
    code.block_mut(to).phi_ids.extend(from_phis);

    redirect_phi_links(code, from, to);

    code.block_mut(from).instr_head = InstrId::NONE;
    code.block_mut(from).instr_tail = InstrId::NONE;
    code.block_mut(from).control_head = InstrId::NONE;
    code.block_mut(from).control_tail = InstrId::NONE;
    code.block_mut(from).phi_ids.clear();

    log::debug!("merged block {from} into block {to}");
    Ok(())
}

/// Rewrites every phi link in the function that names `old_pred` as its source block
/// to name `new_pred` instead (used after a merge or a block split changes which
/// block is the direct predecessor a phi should read from).
pub fn redirect_phi_links(code: &mut CodeContainer, old_pred: BlockId, new_pred: BlockId) {
    for phi in &mut code.phis {
        if let Some(value) = phi.links.shift_remove(&old_pred) {
            phi.links.insert(new_pred, value);
        }
    }
}

/// Splits `block` after `after`: every instruction not sequenced-before `after`
/// (phis excluded — a phi stays bound to whichever block owns it) relocates to a
/// freshly created block, which becomes `block`'s sole successor via an appended
/// `JUMP`. Phi links naming `block` as their source are redirected to the new block
/// wherever they still appear, and `structure` is rebuilt in place to reflect the
/// new edge (spec.md §4.3).
pub fn split_block_after(
    code: &mut CodeContainer,
    structure: &mut CodeStructure,
    block: BlockId,
    after: InstrId,
) -> OptResult<BlockId> {
    if code.instr(after).block != block {
        return Err(OptError::InvalidParameter("split point does not belong to the given block"));
    }

    let new_block = code.new_block();

    let candidates: Vec<InstrId> = code
        .instructions
        .iter()
        .filter(|i| i.block == block && i.id != after && !matches!(i.opcode, Opcode::Phi(_)))
        .map(|i| i.id)
        .collect();
    let mut moved = Vec::new();
    for candidate in candidates {
        if !structure.is_sequenced_before(code, candidate, after)? {
            moved.push(candidate);
        }
    }

    // Control-flow members of `moved` carry prev/next links into the old block's
    // chain; unlink each before reassigning its block, then re-append in the same
    // (ascending id, i.e. program) order so the new block's chain comes out in the
    // same relative order the old one had.
    for &id in &moved {
        if is_control_flow(&code.instr(id).opcode) {
            code.drop_instruction(id);
        }
        code.instr_mut(id).block = new_block;
    }
    for &id in &moved {
        if is_control_flow(&code.instr(id).opcode) {
            code.append_control(id);
        }
    }

    redirect_phi_links(code, block, new_block);

    let jump = code.push_instruction(Instruction::new(InstrId::NONE, block, Opcode::Jump { target: new_block }));
    code.append_control(jump);

    *structure = CodeStructure::build(code)?;

    log::debug!("split block {block} after instruction {after} into new block {new_block}");
    Ok(new_block)
}

/// Whether `instr` can be relocated together with its local (same-block,
/// side-effect-free) dependency chain without crossing a control-flow boundary.
/// Beyond the dependency chain itself, every use of a relocated instruction that
/// falls outside that chain must still be valid from `instr`'s new home: it must
/// not be a `PHI` owned by `target_block` (a phi reads from its predecessors, not
/// from the block that owns it), and `target_block` must dominate whatever block it
/// lives in. `ignore_use` waives that check for specific uses the caller already
/// knows will be gone once the move completes (spec.md §4.3). A failure here is
/// reported as an error rather than silently treated as "no" (SPEC_FULL.md §5 open
/// question resolution).
pub fn can_move_with_local_dependencies(
    code: &CodeContainer,
    structure: &CodeStructure,
    instr: InstrId,
    target_block: BlockId,
    ignore_use: Option<&IgnoreUse>,
) -> OptResult<bool> {
    if code.instr(instr).block == target_block {
        return Ok(true);
    }
    let source_block = code.instr(instr).block;
    let mut moved = HashSet::new();
    can_move_instr(code, structure, instr, source_block, target_block, ignore_use, &mut moved)
}

/// Recursive worker behind `can_move_with_local_dependencies`. `source_block` is
/// fixed at the top instruction's own block for the whole recursion: an input that
/// no longer lives there is treated as an already-available foreign value (valid as
/// long as `target_block` dominates it), not as something else to relocate.
fn can_move_instr(
    code: &CodeContainer,
    structure: &CodeStructure,
    instr: InstrId,
    source_block: BlockId,
    target_block: BlockId,
    ignore_use: Option<&IgnoreUse>,
    moved: &mut HashSet<InstrId>,
) -> OptResult<bool> {
    if code.instr(instr).block != source_block {
        return Ok(structure.is_dominator(target_block, code.instr(instr).block));
    }

    if !can_move_isolated_instruction(code, structure, instr, target_block, moved, ignore_use)? {
        return Ok(false);
    }
    moved.insert(instr);

    let mut movable = true;
    let mut error = None;
    extract_inputs(code, instr, true, &mut |input| {
        match can_move_instr(code, structure, input, source_block, target_block, ignore_use, moved) {
            Ok(true) => Ok(ControlFlow::Continue(())),
            Ok(false) => {
                movable = false;
                Ok(ControlFlow::Break(()))
            }
            Err(err) => {
                error = Some(err);
                Ok(ControlFlow::Break(()))
            }
        }
    })?;
    if let Some(err) = error {
        return Err(err);
    }
    Ok(movable)
}

/// Whether `instr` itself, ignoring its inputs, is safe to relocate into
/// `target_block`: side-effect-free, not control-flow relevant, and every
/// use of it outside `moved` is either waived by `ignore_use` or still valid
/// from the new location.
fn can_move_isolated_instruction(
    code: &CodeContainer,
    structure: &CodeStructure,
    instr: InstrId,
    target_block: BlockId,
    moved: &HashSet<InstrId>,
    ignore_use: Option<&IgnoreUse>,
) -> OptResult<bool> {
    let opcode = code.instr(instr).opcode;
    if is_control_flow(&opcode) || !is_side_effect_free(&opcode) {
        return Ok(false);
    }

    for use_instr in find_uses(code, instr)? {
        if moved.contains(&use_instr) {
            continue;
        }
        if let Some(ignore) = ignore_use {
            if ignore(instr, use_instr) {
                continue;
            }
        }
        let use_block = code.instr(use_instr).block;
        if use_block == target_block && matches!(code.instr(use_instr).opcode, Opcode::Phi(_)) {
            return Ok(false);
        }
        if !structure.is_dominator(target_block, use_block) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Every instruction that reads `instr`'s result, phi links included (a phi's link
/// counts as a use attributed to the phi instruction itself, in its owner block).
fn find_uses(code: &CodeContainer, instr: InstrId) -> OptResult<Vec<InstrId>> {
    let mut uses = Vec::new();
    for candidate in code.instructions.iter().map(|i| i.id) {
        if candidate == instr {
            continue;
        }
        let mut found = false;
        extract_inputs(code, candidate, true, &mut |input| {
            if input == instr {
                found = true;
            }
            Ok(ControlFlow::Continue(()))
        })?;
        if found {
            uses.push(candidate);
        }
    }
    Ok(uses)
}

/// Moves `instr` (and any local dependency chain `can_move_with_local_dependencies`
/// found movable) into `target_block`, appending it to the target's instruction
/// chain. Does not touch the control-flow subsequence: callers only move
/// side-effect-free instructions this way.
pub fn move_with_local_dependencies(
    code: &mut CodeContainer,
    structure: &CodeStructure,
    instr: InstrId,
    target_block: BlockId,
    ignore_use: Option<&IgnoreUse>,
) -> OptResult<()> {
    if !can_move_with_local_dependencies(code, structure, instr, target_block, ignore_use)? {
        return Err(OptError::InvalidRequest("instruction has non-local or side-effecting dependencies"));
    }
    if code.instr(instr).block == target_block {
        return Ok(());
    }

    let mut to_move = Vec::new();
    collect_local_dependencies(code, instr, &mut to_move)?;
    for id in to_move {
        code.instr_mut(id).block = target_block;
    }
    Ok(())
}

fn collect_local_dependencies(code: &CodeContainer, instr: InstrId, out: &mut Vec<InstrId>) -> OptResult<()> {
    if out.contains(&instr) {
        return Ok(());
    }
    let origin_block = code.instr(instr).block;
    extract_inputs(code, instr, true, &mut |input| {
        if code.instr(input).block == origin_block {
            collect_local_dependencies(code, input, out)?;
        }
        Ok(ControlFlow::Continue(()))
    })?;
    out.push(instr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{MemWidth, MemoryFlags, Opcode};
    use crate::testkit::{new_function, push, push_value};
    use crate::value::IntWidth;

    #[test]
    fn trace_visits_instructions_in_ascending_id_order() {
        let mut function = new_function();
        let block = function.code.new_block();
        function.code.entry_block = block;
        let a = push_value(&mut function.code, block, Opcode::UIntConst(IntWidth::W32, 1));
        let b = push_value(&mut function.code, block, Opcode::UIntConst(IntWidth::W32, 2));
        let ret = push(&mut function.code, block, Opcode::Return(b));

        let mut visited = Vec::new();
        trace(&function.code, |id| visited.push(id));
        assert_eq!(visited, vec![a, b, ret]);
    }

    #[test]
    fn merge_into_relocates_instructions_and_redirects_phi_links() {
        let mut function = new_function();
        let to_block = function.code.new_block();
        let from_block = function.code.new_block();
        let join = function.code.new_block();
        function.code.entry_block = to_block;

        let ret = push(&mut function.code, from_block, Opcode::Return(InstrId::NONE));
        let phi_value = push_value(&mut function.code, to_block, Opcode::UIntConst(IntWidth::W32, 7));
        let phi_id = function.code.new_phi(join, crate::ids::TypeId(0));
        function.code.phi_mut(phi_id).set_link(from_block, phi_value);

        merge_into(&mut function.code, to_block, from_block).unwrap();

        assert_eq!(function.code.block(to_block).instr_head, ret);
        assert_eq!(function.code.block(to_block).instr_tail, ret);
        assert_eq!(function.code.instr(ret).block, to_block);
        assert!(function.code.block(from_block).instr_head.is_none());
        assert!(function.code.phi(phi_id).links.get(&from_block).is_none());
        assert_eq!(function.code.phi(phi_id).links.get(&to_block), Some(&phi_value));
    }

    #[test]
    fn redirect_phi_links_renames_the_source_block() {
        let mut function = new_function();
        let old_pred = function.code.new_block();
        let new_pred = function.code.new_block();
        let owner = function.code.new_block();
        let value = push_value(&mut function.code, old_pred, Opcode::UIntConst(IntWidth::W32, 3));
        let phi_id = function.code.new_phi(owner, crate::ids::TypeId(0));
        function.code.phi_mut(phi_id).set_link(old_pred, value);

        redirect_phi_links(&mut function.code, old_pred, new_pred);

        assert!(function.code.phi(phi_id).links.get(&old_pred).is_none());
        assert_eq!(function.code.phi(phi_id).links.get(&new_pred), Some(&value));
    }

    #[test]
    fn split_block_after_relocates_instructions_not_sequenced_before_the_split_point() {
        let mut function = new_function();
        let block = function.code.new_block();
        function.code.entry_block = block;
        let v = push_value(&mut function.code, block, Opcode::UIntConst(IntWidth::W32, 1));
        let s1 = push(&mut function.code, block, Opcode::Store {
            width: MemWidth::Int(IntWidth::W32),
            addr: v,
            value: v,
            flags: MemoryFlags::default(),
        });
        let s2 = push(&mut function.code, block, Opcode::Store {
            width: MemWidth::Int(IntWidth::W32),
            addr: v,
            value: v,
            flags: MemoryFlags::default(),
        });
        let j_target = function.code.new_block();
        push(&mut function.code, j_target, Opcode::Return(InstrId::NONE));
        let j = push(&mut function.code, block, Opcode::Jump { target: j_target });

        let mut structure = CodeStructure::build(&function.code).unwrap();
        let new_block = split_block_after(&mut function.code, &mut structure, block, s1).unwrap();

        // `v` is sequenced-before `s1` (it feeds `s1` itself), so it stays put; `s2`
        // and the original `j` are not, so both relocate.
        assert_eq!(function.code.instr(v).block, block);
        assert_eq!(function.code.instr(s2).block, new_block);
        assert_eq!(function.code.instr(j).block, new_block);
        assert_eq!(function.code.block(new_block).control_head, s2);
        assert_eq!(function.code.block(new_block).control_tail, j);

        // `block` now ends in a freshly appended jump to the split-off block.
        let tail = function.code.control_tail_of(block);
        match function.code.instr(tail).opcode {
            Opcode::Jump { target } => assert_eq!(target, new_block),
            other => panic!("expected a jump to the split block, got {other:?}"),
        }
        assert!(structure.blocks[block.index()].successors.contains(&new_block));
    }

    #[test]
    fn split_block_after_redirects_phi_links_to_the_new_block() {
        let mut function = new_function();
        let block = function.code.new_block();
        function.code.entry_block = block;
        let v = push_value(&mut function.code, block, Opcode::UIntConst(IntWidth::W32, 1));
        let marker = push(&mut function.code, block, Opcode::ScopePush);
        let join = function.code.new_block();
        push(&mut function.code, join, Opcode::Return(InstrId::NONE));
        let j = push(&mut function.code, block, Opcode::Jump { target: join });

        let phi_id = function.code.new_phi(join, crate::ids::TypeId(0));
        function.code.phi_mut(phi_id).set_link(block, v);

        let mut structure = CodeStructure::build(&function.code).unwrap();
        let new_block = split_block_after(&mut function.code, &mut structure, block, marker).unwrap();

        assert_eq!(function.code.instr(j).block, new_block);
        assert!(function.code.phi(phi_id).links.get(&block).is_none());
        assert_eq!(function.code.phi(phi_id).links.get(&new_block), Some(&v));
    }

    #[test]
    fn split_block_after_rejects_a_foreign_split_point() {
        let mut function = new_function();
        let block_a = function.code.new_block();
        let block_b = function.code.new_block();
        let foreign = push(&mut function.code, block_b, Opcode::Unreachable);
        let mut structure = CodeStructure::build(&function.code).unwrap();
        assert!(split_block_after(&mut function.code, &mut structure, block_a, foreign).is_err());
    }

    #[test]
    fn local_literal_dependencies_are_movable_across_blocks() {
        let mut function = new_function();
        let origin = function.code.new_block();
        let target = function.code.new_block();
        function.code.entry_block = origin;
        let c1 = push_value(&mut function.code, origin, Opcode::UIntConst(IntWidth::W32, 1));
        let c2 = push_value(&mut function.code, origin, Opcode::UIntConst(IntWidth::W32, 2));
        let sum = push_value(&mut function.code, origin, Opcode::IntAdd(IntWidth::W32, c1, c2));

        let structure = CodeStructure::build(&function.code).unwrap();
        assert!(can_move_with_local_dependencies(&function.code, &structure, sum, target, None).unwrap());
        move_with_local_dependencies(&mut function.code, &structure, sum, target, None).unwrap();
        assert_eq!(function.code.instr(sum).block, target);
        assert_eq!(function.code.instr(c1).block, target);
        assert_eq!(function.code.instr(c2).block, target);
    }

    #[test]
    fn side_effecting_instructions_are_never_movable() {
        let mut function = new_function();
        let origin = function.code.new_block();
        let target = function.code.new_block();
        function.code.entry_block = origin;
        let v = push_value(&mut function.code, origin, Opcode::UIntConst(IntWidth::W32, 1));
        let store = push(&mut function.code, origin, Opcode::Store {
            width: MemWidth::Int(IntWidth::W32),
            addr: v,
            value: v,
            flags: MemoryFlags::default(),
        });
        let structure = CodeStructure::build(&function.code).unwrap();
        assert!(!can_move_with_local_dependencies(&function.code, &structure, store, target, None).unwrap());
        assert!(move_with_local_dependencies(&mut function.code, &structure, store, target, None).is_err());
    }

    #[test]
    fn an_external_use_not_dominated_by_the_target_block_blocks_the_move() {
        let mut function = new_function();
        let entry = function.code.new_block();
        let target = function.code.new_block();
        let other = function.code.new_block();
        function.code.entry_block = entry;

        let v = push_value(&mut function.code, entry, Opcode::UIntConst(IntWidth::W32, 1));
        // `other` is never reached from `entry`, so `target` can't dominate it —
        // moving `v` there would leave this use without a valid definition.
        push(&mut function.code, other, Opcode::Return(v));
        push(&mut function.code, target, Opcode::Unreachable);
        push(&mut function.code, entry, Opcode::Unreachable);

        let structure = CodeStructure::build(&function.code).unwrap();
        assert!(!can_move_with_local_dependencies(&function.code, &structure, v, target, None).unwrap());
    }

    #[test]
    fn an_ignored_use_does_not_block_the_move() {
        let mut function = new_function();
        let origin = function.code.new_block();
        let target = function.code.new_block();
        let other = function.code.new_block();
        function.code.entry_block = origin;

        let v = push_value(&mut function.code, origin, Opcode::UIntConst(IntWidth::W32, 1));
        let consumer = push(&mut function.code, other, Opcode::Return(v));
        push(&mut function.code, origin, Opcode::Unreachable);

        let structure = CodeStructure::build(&function.code).unwrap();
        assert!(!can_move_with_local_dependencies(&function.code, &structure, v, target, None).unwrap());
        assert!(can_move_with_local_dependencies(
            &function.code,
            &structure,
            v,
            target,
            Some(&|_def, use_instr| use_instr == consumer)
        )
        .unwrap());
    }
}
