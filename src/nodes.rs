//! Auxiliary node kinds referenced by opcode payloads (spec.md §3): phi nodes, call
//! nodes, and inline-assembly nodes. Kept in their own arenas rather than inline in
//! `Instruction` because each is a variable-length, addressed record (a `Phi(PhiId)`
//! opcode just names one) — the same shape `seen_ir`'s `function.rs`/`module.rs` use for
//! `Parameter`/`LocalVariable`/`GlobalVariable` side tables.

use indexmap::IndexMap;

use crate::ids::{BlockId, FunctionId, InstrId, TypeId};

/// A phi node: one incoming value per predecessor block it is still linked from.
/// Links to blocks that are no longer predecessors are dropped by the
/// `drop-dead-phi-links` pass rather than eagerly, so this map can transiently
/// contain stale entries between a CFG edit and the next structure rebuild.
#[derive(Debug, Clone, Default)]
pub struct Phi {
    pub id: crate::ids::PhiId,
    pub owner_block: BlockId,
    pub result_type: TypeId,
    pub links: IndexMap<BlockId, InstrId>,
}

impl Phi {
    pub fn new(id: crate::ids::PhiId, owner_block: BlockId, result_type: TypeId) -> Self {
        Phi {
            id,
            owner_block,
            result_type,
            links: IndexMap::new(),
        }
    }

    pub fn set_link(&mut self, from: BlockId, value: InstrId) {
        self.links.insert(from, value);
    }

    pub fn drop_link(&mut self, from: BlockId) -> Option<InstrId> {
        self.links.shift_remove(&from)
    }
}

/// A function declaration as seen from a call site: enough to tell whether an
/// argument is passed by reference (and thus does not count as "escaping" through
/// the argument slot itself — see `tail_call.rs`) and whether the callee can return
/// more than once (`setjmp`-like), which blocks tail-call promotion outright.
#[derive(Debug, Clone)]
pub struct FunctionDeclaration {
    pub id: FunctionId,
    pub name: String,
    pub parameter_types: Vec<TypeId>,
    pub parameter_by_reference: Vec<bool>,
    pub result_type: Option<TypeId>,
    pub variadic: bool,
    pub returns_twice: bool,
}

/// A call node: the callee (direct via `declaration`, or indirect via `indirect`
/// naming the instruction producing the function pointer), its argument refs, and an
/// optional return-space ref for aggregate results returned through a hidden pointer.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: crate::ids::CallId,
    pub declaration: FunctionId,
    pub indirect: InstrId,
    pub arguments: Vec<InstrId>,
    pub return_space: InstrId,
}

/// One parameter of an inline-assembly node: a read and/or a load-store ref, each
/// individually checked for escape (spec.md §4.5's "for each parameter, the read ref
/// and/or the load-store ref").
#[derive(Debug, Clone)]
pub struct InlineAsmParameter {
    pub constraint: String,
    pub read_ref: InstrId,
    pub load_store_ref: InstrId,
}

#[derive(Debug, Clone, Default)]
pub struct InlineAsm {
    pub id: crate::ids::InlineAsmId,
    pub template: String,
    pub parameters: Vec<InlineAsmParameter>,
    pub clobbers: Vec<String>,
    pub default_jump_target: BlockId,
    pub jump_targets: IndexMap<String, BlockId>,
}

impl InlineAsm {
    pub fn new(id: crate::ids::InlineAsmId) -> Self {
        InlineAsm {
            id,
            ..Default::default()
        }
    }
}
