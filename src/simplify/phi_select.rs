//! PHI-to-SELECT conversion (spec.md §4.4): a two-link phi whose owning block's
//! immediate dominator ends in a two-way `BRANCH`/`BRANCH_COMPARE` targeting exactly
//! the phi's two predecessors collapses into a `SELECT`/`SELECT_COMPARE` synthesized
//! in the phi's own block, hoisting either incoming value into the dominator first
//! when it did not originate there (spec.md §4.4's worked example 4).

use crate::error::OptResult;
use crate::function::Function;
use crate::ids::{BlockId, InstrId, PhiId};
use crate::instruction::{Instruction, Opcode};
use crate::simplify::replace_uses;
use crate::structure::CodeStructure;
use crate::surgery::{can_move_with_local_dependencies, move_with_local_dependencies};
use crate::value::{BranchVariant, Comparison};

fn true_false_successors(target: BlockId, alt: BlockId, variant: BranchVariant) -> (BlockId, BlockId) {
    match variant {
        BranchVariant::Normal => (target, alt),
        BranchVariant::Inverted => (alt, target),
    }
}

enum Condition {
    Bool(InstrId),
    Compare(Comparison, InstrId, InstrId),
}

/// The dominator's terminator, read as a selectable condition plus the (true, false)
/// successor pair, or `None` if it isn't a two-way branch at all.
fn dominator_condition(function: &Function, idom: BlockId) -> Option<(Condition, BlockId, BlockId)> {
    let tail = function.code.control_tail_of(idom);
    if tail.is_none() {
        return None;
    }
    match function.code.instr(tail).opcode {
        Opcode::Branch { condition, target, alt, variant } => {
            let (t, f) = true_false_successors(target, alt, variant);
            Some((Condition::Bool(condition), t, f))
        }
        Opcode::BranchCompare { cmp, lhs, rhs, target, alt, variant } => {
            let (t, f) = true_false_successors(target, alt, variant);
            Some((Condition::Compare(cmp, lhs, rhs), t, f))
        }
        _ => None,
    }
}

fn find_phi_instr(function: &Function, owner: BlockId, phi_id: PhiId) -> Option<InstrId> {
    function
        .code
        .instructions
        .iter()
        .find(|i| i.block == owner && matches!(i.opcode, Opcode::Phi(id) if id == phi_id))
        .map(|i| i.id)
}

fn try_convert(function: &mut Function, structure: &CodeStructure, phi_id: PhiId) -> OptResult<bool> {
    if phi_id.index() >= function.code.phis.len() {
        return Ok(false);
    }
    let owner = function.code.phi(phi_id).owner_block;
    let idom = structure.blocks[owner.index()].immediate_dominator;
    if idom.is_none() {
        return Ok(false);
    }
    let Some((condition, true_block, false_block)) = dominator_condition(function, idom) else {
        return Ok(false);
    };

    let phi = function.code.phi(phi_id);
    if phi.links.len() != 2 {
        return Ok(false);
    }
    let (on_true, on_false) = match (phi.links.get(&true_block), phi.links.get(&false_block)) {
        (Some(&t), Some(&f)) => (t, f),
        _ => return Ok(false),
    };

    let Some(phi_instr) = find_phi_instr(function, owner, phi_id) else {
        return Ok(false);
    };

    if !can_move_with_local_dependencies(&function.code, structure, on_true, idom, None)?
        || !can_move_with_local_dependencies(&function.code, structure, on_false, idom, None)?
    {
        return Ok(false);
    }
    move_with_local_dependencies(&mut function.code, structure, on_true, idom, None)?;
    move_with_local_dependencies(&mut function.code, structure, on_false, idom, None)?;

    let opcode = match condition {
        Condition::Bool(c) => Opcode::Select { condition: c, on_true, on_false },
        Condition::Compare(cmp, lhs, rhs) => Opcode::SelectCompare { cmp, lhs, rhs, on_true, on_false },
    };
    let select_id = function.code.push_instruction(Instruction::new(InstrId::NONE, owner, opcode));

    replace_uses(&mut function.code, phi_instr, select_id);
    function.code.drop_instruction(phi_instr);
    function.code.block_mut(owner).phi_ids.retain(|&id| id != phi_id);

    log::debug!("converted phi {phi_id} in block {owner} to a select");
    Ok(true)
}

/// Runs one sweep of phi-to-select conversion over every phi still present in
/// `function`, using the dominator tree recorded in `structure`. Returns whether
/// anything changed.
pub fn run(function: &mut Function, structure: &CodeStructure) -> OptResult<bool> {
    let phi_ids: Vec<PhiId> = function.code.phis.iter().map(|p| p.id).collect();
    let mut changed = false;
    for phi_id in phi_ids {
        if try_convert(function, structure, phi_id)? {
            changed = true;
        }
    }
    Ok(changed)
}
