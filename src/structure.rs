//! Code structure analysis (spec.md §4.2): CFG linking, dominators, and the
//! sequenced-before partial order.

use std::ops::ControlFlow;

use indexmap::{IndexMap, IndexSet};

use crate::error::{OptError, OptResult};
use crate::function::{CodeContainer, Function};
use crate::ids::{BlockId, InstrId};
use crate::instruction::Opcode;
use crate::introspect::{extract_inputs, is_control_flow};

#[derive(Debug, Clone, Default)]
pub struct BlockStructure {
    pub predecessors: IndexSet<BlockId>,
    pub successors: IndexSet<BlockId>,
    pub immediate_dominator: BlockId,
}

/// The analysis results for one function's code container (spec.md §4.2). Rebuilt
/// from scratch whenever the CFG changes; the sequenced-before cache can be dropped
/// independently via `drop_sequencing_cache` when only instruction order (not block
/// linkage) has changed.
#[derive(Debug, Clone, Default)]
pub struct CodeStructure {
    pub blocks: Vec<BlockStructure>,
    pub indirect_jump_target_blocks: IndexSet<BlockId>,
    sequenced_before_cache: IndexSet<(InstrId, InstrId)>,
}

impl CodeStructure {
    pub fn new(num_blocks: usize) -> Self {
        CodeStructure {
            blocks: vec![BlockStructure::default(); num_blocks],
            indirect_jump_target_blocks: IndexSet::new(),
            sequenced_before_cache: IndexSet::new(),
        }
    }

    pub fn drop_sequencing_cache(&mut self) {
        self.sequenced_before_cache.clear();
    }

    /// Builds linkage and dominators for `code` in one step (spec.md §4.2 "build").
    pub fn build(code: &CodeContainer) -> OptResult<CodeStructure> {
        let mut structure = CodeStructure::new(code.blocks.len());
        link_blocks(code, &mut structure)?;
        find_dominators(code, &mut structure)?;
        log::debug!(
            "code structure rebuilt: {} blocks, {} indirect jump targets",
            code.blocks.len(),
            structure.indirect_jump_target_blocks.len()
        );
        Ok(structure)
    }

    pub fn is_dominator(&self, dominator: BlockId, dominated: BlockId) -> bool {
        let mut cursor = dominated;
        loop {
            if cursor == dominator {
                return true;
            }
            let idom = self.blocks[cursor.index()].immediate_dominator;
            if idom.is_none() || idom == cursor {
                return false;
            }
            cursor = idom;
        }
    }

    /// Whether `instr1` is guaranteed to execute, and to have completed, before
    /// `instr2` on every control path (spec.md §4.2 "sequenced-before").
    pub fn is_sequenced_before(
        &mut self,
        code: &CodeContainer,
        instr1: InstrId,
        instr2: InstrId,
    ) -> OptResult<bool> {
        let key = (instr1, instr2);
        if self.sequenced_before_cache.contains(&key) {
            return Ok(true);
        }

        let block1 = code.instr(instr1).block;
        let block2 = code.instr(instr2).block;
        let result = if block1 == block2 {
            is_locally_sequenced_before(self, code, instr1, instr2)?
        } else {
            self.is_dominator(block1, block2)
        };

        if result {
            self.sequenced_before_cache.insert(key);
        }
        Ok(result)
    }
}

/// The same-block half of sequenced-before (spec.md §4.2): defaults to true, and is
/// only falsified by two checks, each gated on the relevant instruction actually
/// being control-flow relevant (a plain data instruction imposes no ordering
/// constraint of its own). If both `instr1` and `instr2` are control-flow relevant,
/// `instr1` must appear walking `instr2`'s control-flow chain backward. If `instr2`
/// is control-flow relevant, every one of `instr1`'s own inputs (with phis resolved)
/// must recursively be sequenced-before `instr2` too — a control instruction can't be
/// reordered ahead of values it depends on, wherever those values live.
fn is_locally_sequenced_before(
    structure: &mut CodeStructure,
    code: &CodeContainer,
    instr1: InstrId,
    instr2: InstrId,
) -> OptResult<bool> {
    let instr1_control_flow = is_control_flow(&code.instr(instr1).opcode);
    let instr2_control_flow = is_control_flow(&code.instr(instr2).opcode);

    let mut result = true;
    if instr1_control_flow && instr2_control_flow {
        let mut cursor = instr2;
        let mut found = false;
        while cursor.is_some() {
            if cursor == instr1 {
                found = true;
                break;
            }
            cursor = code.instr(cursor).control_prev;
        }
        if !found {
            result = false;
        }
    }

    if result && instr2_control_flow {
        let mut all_inputs_sequenced = true;
        let mut error = None;
        extract_inputs(code, instr1, true, &mut |input| {
            match structure.is_sequenced_before(code, input, instr2) {
                Ok(true) => Ok(ControlFlow::Continue(())),
                Ok(false) => {
                    all_inputs_sequenced = false;
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
        result = all_inputs_sequenced;
    }

    Ok(result)
}

/// Appends `block_id` to the successor list it belongs in, and `block_id` itself to
/// the predecessor list of each successor (spec.md §4.2 step 2).
fn link_block(code: &CodeContainer, structure: &mut CodeStructure, block_id: BlockId) -> OptResult<()> {
    let tail = code.control_tail_of(block_id);
    if tail.is_none() {
        return Ok(());
    }

    let mut successors: Vec<BlockId> = Vec::new();
    match &code.instr(tail).opcode {
        Opcode::Jump { target } => successors.push(*target),
        Opcode::Branch { target, alt, .. } => {
            successors.push(*target);
            successors.push(*alt);
        }
        Opcode::BranchCompare { target, alt, .. } => {
            successors.push(*target);
            successors.push(*alt);
        }
        Opcode::IJump(..) => {
            successors.extend(structure.indirect_jump_target_blocks.iter().copied());
        }
        Opcode::InlineAssembly(asm_id) => {
            let asm = code.inline_asm(*asm_id);
            if !asm.jump_targets.is_empty() {
                if asm.default_jump_target.is_some() {
                    successors.push(asm.default_jump_target);
                }
                successors.extend(asm.jump_targets.values().copied());
            }
        }
        Opcode::Return(..) | Opcode::Unreachable | Opcode::TailInvoke { .. } => {}
        other => {
            return Err(OptError::InvalidState(format!(
                "block {} has a non-terminator control tail: {}",
                block_id,
                other.name()
            )));
        }
    }

    for successor in successors {
        structure.blocks[block_id.index()].successors.insert(successor);
        structure.blocks[successor.index()].predecessors.insert(block_id);
    }
    Ok(())
}

/// Populates `indirect_jump_target_blocks` from both `BLOCK_LABEL` pseudo-instructions
/// and blocks with non-empty `public_labels` (SPEC_FULL.md §3), then links every block.
fn link_blocks(code: &CodeContainer, structure: &mut CodeStructure) -> OptResult<()> {
    for instr in &code.instructions {
        if let Opcode::BlockLabel(target) = instr.opcode {
            structure.indirect_jump_target_blocks.insert(target);
        }
    }
    for block in &code.blocks {
        if !block.public_labels.is_empty() {
            structure.indirect_jump_target_blocks.insert(block.id);
        }
    }

    for block in &code.blocks {
        link_block(code, structure, block.id)?;
    }
    Ok(())
}

/// Dominator computation: this crate runs the Cooper/Harvey/Kennedy iterative
/// fixpoint over a reverse postorder of the CFG rather than Semi-NCA — same result,
/// and easier to get right without a compiler to check it against (see DESIGN.md).
/// Unreachable blocks (no path from the entry block) are left with
/// `immediate_dominator == BlockId::NONE`.
fn find_dominators(code: &CodeContainer, structure: &mut CodeStructure) -> OptResult<()> {
    let entry = code.entry_block;
    if entry.is_none() {
        return Ok(());
    }
    let n = code.blocks.len();

    // Postorder DFS from the entry block over successors, reversed to get reverse
    // postorder — a numbering in which every block appears after all its predecessors
    // that are not loop back-edges.
    let mut seen = vec![false; n];
    let mut postorder: Vec<BlockId> = Vec::with_capacity(n);
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    seen[entry.index()] = true;
    while let Some((block, next_succ)) = stack.last().copied() {
        let successors = &structure.blocks[block.index()].successors;
        if next_succ < successors.len() {
            stack.last_mut().unwrap().1 += 1;
            let succ = successors[next_succ];
            if !seen[succ.index()] {
                seen[succ.index()] = true;
                stack.push((succ, 0));
            }
        } else {
            postorder.push(block);
            stack.pop();
        }
    }
    let mut rpo: Vec<BlockId> = postorder;
    rpo.reverse();

    let mut rank: IndexMap<BlockId, usize> = IndexMap::new();
    for (i, &block) in rpo.iter().enumerate() {
        rank.insert(block, i);
    }

    let mut idom: Vec<Option<usize>> = vec![None; rpo.len()];
    idom[0] = Some(0);

    let intersect = |mut a: usize, mut b: usize, idom: &[Option<usize>]| -> usize {
        while a != b {
            while a > b {
                a = idom[a].expect("processed predecessor has a resolved idom");
            }
            while b > a {
                b = idom[b].expect("processed predecessor has a resolved idom");
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for i in 1..rpo.len() {
            let block = rpo[i];
            let mut new_idom: Option<usize> = None;
            for &pred in &structure.blocks[block.index()].predecessors {
                let Some(&pred_rank) = rank.get(&pred) else {
                    continue; // predecessor unreachable from entry
                };
                if idom[pred_rank].is_none() && pred_rank != 0 {
                    continue; // not yet processed this round
                }
                new_idom = Some(match new_idom {
                    None => pred_rank,
                    Some(existing) => intersect(existing, pred_rank, &idom),
                });
            }
            if new_idom != idom[i] {
                idom[i] = new_idom;
                changed = true;
            }
        }
    }

    for (i, &block) in rpo.iter().enumerate() {
        structure.blocks[block.index()].immediate_dominator = match idom[i] {
            Some(idom_rank) if i != 0 => rpo[idom_rank],
            _ => BlockId::NONE,
        };
    }

    Ok(())
}

/// Drops phi links that name a block no longer present in the (freshly rebuilt)
/// predecessor list (spec.md §4.2).
pub fn drop_dead_phi_links(code: &mut CodeContainer) -> OptResult<usize> {
    let structure = CodeStructure::build(code)?;
    let mut dropped = 0;
    let block_ids: Vec<BlockId> = code.blocks.iter().map(|b| b.id).collect();
    for block_id in block_ids {
        let phi_ids = code.block(block_id).phi_ids.clone();
        for phi_id in phi_ids {
            let stale: Vec<BlockId> = code
                .phi(phi_id)
                .links
                .keys()
                .copied()
                .filter(|from| !structure.blocks[block_id.index()].predecessors.contains(from))
                .collect();
            for from in stale {
                code.phi_mut(phi_id).drop_link(from);
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        log::debug!("drop-dead-phi-links: removed {dropped} stale phi links");
    }
    Ok(dropped)
}

pub fn build_structure(function: &Function) -> OptResult<CodeStructure> {
    CodeStructure::build(&function.code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{new_function, push, push_value};
    use crate::value::IntWidth;

    /// entry branches to `t`/`e`, both of which jump to `join` — the textbook diamond
    /// whose join point is dominated by `entry` but by neither arm.
    fn diamond() -> (Function, BlockId, BlockId, BlockId, BlockId) {
        let mut function = new_function();
        let entry = function.code.new_block();
        let t = function.code.new_block();
        let e = function.code.new_block();
        let join = function.code.new_block();
        function.code.entry_block = entry;

        let cond = push_value(&mut function.code, entry, Opcode::UIntConst(IntWidth::W8, 1));
        push(&mut function.code, entry, Opcode::Branch {
            condition: cond,
            target: t,
            alt: e,
            variant: crate::value::BranchVariant::Normal,
        });
        push(&mut function.code, t, Opcode::Jump { target: join });
        push(&mut function.code, e, Opcode::Jump { target: join });
        push(&mut function.code, join, Opcode::Return(InstrId::NONE));

        (function, entry, t, e, join)
    }

    #[test]
    fn link_blocks_builds_predecessor_and_successor_lists() {
        let (function, entry, t, e, join) = diamond();
        let structure = CodeStructure::build(&function.code).unwrap();
        assert_eq!(structure.blocks[entry.index()].successors.iter().copied().collect::<Vec<_>>(), vec![t, e]);
        assert!(structure.blocks[t.index()].predecessors.contains(&entry));
        assert!(structure.blocks[e.index()].predecessors.contains(&entry));
        assert!(structure.blocks[join.index()].predecessors.contains(&t));
        assert!(structure.blocks[join.index()].predecessors.contains(&e));
    }

    #[test]
    fn dominators_of_a_diamond() {
        let (function, entry, t, e, join) = diamond();
        let structure = CodeStructure::build(&function.code).unwrap();
        assert_eq!(structure.blocks[entry.index()].immediate_dominator, BlockId::NONE);
        assert_eq!(structure.blocks[t.index()].immediate_dominator, entry);
        assert_eq!(structure.blocks[e.index()].immediate_dominator, entry);
        // The join point is reached from both arms, so neither arm dominates it —
        // only their common ancestor, `entry`, does.
        assert_eq!(structure.blocks[join.index()].immediate_dominator, entry);
        assert!(structure.is_dominator(entry, join));
        assert!(!structure.is_dominator(t, join));
        assert!(!structure.is_dominator(e, join));
        assert!(structure.is_dominator(join, join));
    }

    #[test]
    fn unreachable_block_has_no_dominator() {
        let (mut function, entry, ..) = diamond();
        let orphan = function.code.new_block();
        push(&mut function.code, orphan, Opcode::Unreachable);
        let structure = CodeStructure::build(&function.code).unwrap();
        assert_eq!(structure.blocks[orphan.index()].immediate_dominator, BlockId::NONE);
        assert!(!structure.is_dominator(entry, orphan));
    }

    #[test]
    fn sequenced_before_crosses_blocks_via_dominance() {
        let (function, entry, t, ..) = diamond();
        let mut structure = CodeStructure::build(&function.code).unwrap();
        let entry_cond = function.code.control_tail_of(entry);
        let t_jump = function.code.control_tail_of(t);
        assert!(structure.is_sequenced_before(&function.code, entry_cond, t_jump).unwrap());
        assert!(!structure.is_sequenced_before(&function.code, t_jump, entry_cond).unwrap());
    }

    #[test]
    fn sequenced_before_within_a_block_walks_the_control_chain() {
        // `ScopePush` takes no operands, so the same-block rule reduces to the
        // backward control-chain search with nothing further to verify.
        let mut function = new_function();
        let block = function.code.new_block();
        function.code.entry_block = block;
        let scope = push(&mut function.code, block, Opcode::ScopePush);
        let ret = push(&mut function.code, block, Opcode::Return(InstrId::NONE));
        let mut structure = CodeStructure::build(&function.code).unwrap();
        assert!(structure.is_sequenced_before(&function.code, scope, ret).unwrap());
        assert!(!structure.is_sequenced_before(&function.code, ret, scope).unwrap());
    }

    #[test]
    fn a_plain_data_instruction_is_sequenced_before_a_later_same_block_terminator() {
        let mut function = new_function();
        let block = function.code.new_block();
        function.code.entry_block = block;
        let v = push_value(&mut function.code, block, Opcode::UIntConst(IntWidth::W32, 1));
        let w = push_value(&mut function.code, block, Opcode::IntAdd(IntWidth::W32, v, v));
        let ret = push(&mut function.code, block, Opcode::Return(w));
        let mut structure = CodeStructure::build(&function.code).unwrap();
        assert!(structure.is_sequenced_before(&function.code, v, ret).unwrap());
        assert!(structure.is_sequenced_before(&function.code, w, ret).unwrap());
    }

    #[test]
    fn drop_dead_phi_links_removes_stale_predecessors() {
        let mut function = new_function();
        let entry = function.code.new_block();
        let pred_a = function.code.new_block();
        let pred_b = function.code.new_block();
        function.code.entry_block = entry;

        let v_a = push_value(&mut function.code, pred_a, Opcode::UIntConst(IntWidth::W32, 1));
        let v_b = push_value(&mut function.code, pred_b, Opcode::UIntConst(IntWidth::W32, 2));
        push(&mut function.code, pred_a, Opcode::Jump { target: entry });
        // pred_b never actually jumps to entry: its phi link is stale from the start,
        // standing in for "a predecessor was since removed by an earlier CFG edit".
        push(&mut function.code, pred_b, Opcode::Unreachable);
        push(&mut function.code, entry, Opcode::Return(InstrId::NONE));

        let phi_id = function.code.new_phi(entry, crate::ids::TypeId(0));
        function.code.phi_mut(phi_id).set_link(pred_a, v_a);
        function.code.phi_mut(phi_id).set_link(pred_b, v_b);

        let dropped = drop_dead_phi_links(&mut function.code).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(function.code.phi(phi_id).links.len(), 1);
        assert_eq!(function.code.phi(phi_id).links.get(&pred_a), Some(&v_a));
    }
}
