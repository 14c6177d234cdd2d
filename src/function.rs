//! Blocks, the per-function code container, and function declarations (spec.md §3).

use indexmap::IndexSet;

use crate::ids::{BlockId, CallId, FunctionId, InlineAsmId, InstrId, PhiId, TypeId};
use crate::instruction::Instruction;
use crate::nodes::{Call, FunctionDeclaration, InlineAsm, Phi};

/// A basic block: its phi nodes, the head/tail of its instruction chain, the head/tail
/// of its control-flow subsequence, and the public labels that make it a valid indirect
/// jump target from outside the function (spec.md §4.2's `link_blocks` step 1).
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub id: BlockId,
    pub phi_ids: Vec<PhiId>,
    pub instr_head: InstrId,
    pub instr_tail: InstrId,
    pub control_head: InstrId,
    pub control_tail: InstrId,
    pub public_labels: IndexSet<String>,
    pub is_entry: bool,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Block {
            id,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instr_head.is_none()
    }
}

/// The arena set owned by one function: every instruction, phi, call, and
/// inline-assembly node it contains, plus the blocks that reference them. Dense `u32`
/// ids throughout; nothing here is a pointer (spec.md §9).
#[derive(Debug, Clone, Default)]
pub struct CodeContainer {
    pub blocks: Vec<Block>,
    pub instructions: Vec<Instruction>,
    pub phis: Vec<Phi>,
    pub calls: Vec<Call>,
    pub inline_asm: Vec<InlineAsm>,
    pub entry_block: BlockId,
}

impl CodeContainer {
    pub fn new() -> Self {
        CodeContainer::default()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instructions[id.index()]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.instructions[id.index()]
    }

    pub fn phi(&self, id: PhiId) -> &Phi {
        &self.phis[id.index()]
    }

    pub fn phi_mut(&mut self, id: PhiId) -> &mut Phi {
        &mut self.phis[id.index()]
    }

    pub fn call(&self, id: CallId) -> &Call {
        &self.calls[id.index()]
    }

    pub fn inline_asm(&self, id: InlineAsmId) -> &InlineAsm {
        &self.inline_asm[id.index()]
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id));
        id
    }

    /// Appends `instr` to the tail of `block`'s instruction chain. Does not touch the
    /// control-flow subsequence; callers that append a control-bearing instruction
    /// must also call `append_control`.
    pub fn push_instruction(&mut self, mut instr: Instruction) -> InstrId {
        let id = InstrId(self.instructions.len() as u32);
        instr.id = id;
        let block = instr.block;
        self.instructions.push(instr);

        let tail = self.block(block).instr_tail;
        if tail.is_none() {
            self.block_mut(block).instr_head = id;
        }
        self.block_mut(block).instr_tail = id;
        id
    }

    /// Links `instr` onto the end of its block's control-flow subsequence (spec.md
    /// §3: "a subsequence of control-flow-relevant instructions").
    pub fn append_control(&mut self, instr: InstrId) {
        let block = self.instr(instr).block;
        let tail = self.block(block).control_tail;
        if tail.is_some() {
            self.instr_mut(tail).control_next = instr;
        } else {
            self.block_mut(block).control_head = instr;
        }
        self.instr_mut(instr).control_prev = tail;
        self.block_mut(block).control_tail = instr;
    }

    /// The last control-flow-relevant instruction of `block`, or `NONE` if it has none
    /// (an empty / not-yet-terminated block).
    pub fn control_tail_of(&self, block: BlockId) -> InstrId {
        self.block(block).control_tail
    }

    pub fn new_phi(&mut self, owner_block: BlockId, result_type: TypeId) -> PhiId {
        let id = PhiId(self.phis.len() as u32);
        self.phis.push(Phi::new(id, owner_block, result_type));
        self.block_mut(owner_block).phi_ids.push(id);
        id
    }

    pub fn new_call(&mut self, declaration: FunctionId, indirect: InstrId) -> CallId {
        let id = CallId(self.calls.len() as u32);
        self.calls.push(Call {
            id,
            declaration,
            indirect,
            arguments: Vec::new(),
            return_space: InstrId::NONE,
        });
        id
    }

    pub fn new_inline_asm(&mut self) -> InlineAsmId {
        let id = InlineAsmId(self.inline_asm.len() as u32);
        self.inline_asm.push(InlineAsm::new(id));
        id
    }

    /// Removes an instruction from both its instruction chain and (if present) its
    /// control-flow subsequence, and drops its entry. Callers are responsible for
    /// having already redirected any remaining uses (spec.md §4.3 surgery
    /// invariant: "no instruction is dropped while still used").
    pub fn drop_instruction(&mut self, id: InstrId) {
        let block = self.instr(id).block;

        let (control_prev, control_next) = {
            let instr = self.instr(id);
            (instr.control_prev, instr.control_next)
        };
        if control_prev.is_some() || control_next.is_some() || self.block(block).control_head == id {
            if control_prev.is_some() {
                self.instr_mut(control_prev).control_next = control_next;
            } else {
                self.block_mut(block).control_head = control_next;
            }
            if control_next.is_some() {
                self.instr_mut(control_next).control_prev = control_prev;
            } else {
                self.block_mut(block).control_tail = control_prev;
            }
        }
    }
}

/// A function: its declaration, locals, and code container.
#[derive(Debug, Clone)]
pub struct Function {
    pub id: FunctionId,
    pub declaration: FunctionDeclaration,
    pub locals: Vec<TypeId>,
    pub code: CodeContainer,
}

impl Function {
    pub fn new(id: FunctionId, declaration: FunctionDeclaration) -> Self {
        Function {
            id,
            declaration,
            locals: Vec::new(),
            code: CodeContainer::new(),
        }
    }
}
