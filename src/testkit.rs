//! Small IR-building helpers shared by this crate's own unit tests. Not part of the
//! public API: every test below builds just enough of a function by hand to exercise
//! one rewrite or analysis, the same way `seen_ir`'s inline `mod tests` blocks build a
//! handful of instructions directly rather than going through a full compiler pipeline.

#![cfg(test)]

use crate::function::{CodeContainer, Function};
use crate::ids::{BlockId, FunctionId, InstrId};
use crate::instruction::Instruction;
use crate::introspect::is_control_flow;
use crate::nodes::FunctionDeclaration;
use crate::Opcode;

pub(crate) fn new_function() -> Function {
    let declaration = FunctionDeclaration {
        id: FunctionId(0),
        name: "test_fn".to_string(),
        parameter_types: Vec::new(),
        parameter_by_reference: Vec::new(),
        result_type: None,
        variadic: false,
        returns_twice: false,
    };
    Function::new(FunctionId(0), declaration)
}

/// Appends `opcode` to `block`, linking it onto the control-flow chain too when its
/// shape calls for that (mirrors what a real builder layer would do on construction).
pub(crate) fn push(code: &mut CodeContainer, block: BlockId, opcode: Opcode) -> InstrId {
    let is_control = is_control_flow(&opcode);
    let id = code.push_instruction(Instruction::new(InstrId::NONE, block, opcode));
    if is_control {
        code.append_control(id);
    }
    id
}

/// Appends `opcode` as a plain, non-control-flow instruction regardless of its normal
/// classification — used the handful of places a test wants a value that is not yet
/// wired onto the control chain.
pub(crate) fn push_value(code: &mut CodeContainer, block: BlockId, opcode: Opcode) -> InstrId {
    code.push_instruction(Instruction::new(InstrId::NONE, block, opcode))
}
