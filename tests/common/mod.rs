//! Small IR-building helpers shared by this crate's integration tests, mirroring the
//! crate-internal `testkit` module used by the unit tests in `src/`.

use ssa_midend::introspect::is_control_flow;
use ssa_midend::nodes::FunctionDeclaration;
use ssa_midend::{CodeContainer, Function, FunctionId, Instruction, InstrId, BlockId, Opcode};

#[allow(dead_code)]
pub fn new_function(id: u32, name: &str) -> Function {
    let declaration = FunctionDeclaration {
        id: FunctionId(id),
        name: name.to_string(),
        parameter_types: Vec::new(),
        parameter_by_reference: Vec::new(),
        result_type: None,
        variadic: false,
        returns_twice: false,
    };
    Function::new(FunctionId(id), declaration)
}

/// Appends `opcode` to `block`, linking it onto the control-flow chain too when its
/// shape calls for that.
#[allow(dead_code)]
pub fn push(code: &mut CodeContainer, block: BlockId, opcode: Opcode) -> InstrId {
    let is_control = is_control_flow(&opcode);
    let id = code.push_instruction(Instruction::new(InstrId::NONE, block, opcode));
    if is_control {
        code.append_control(id);
    }
    id
}

#[allow(dead_code)]
pub fn push_value(code: &mut CodeContainer, block: BlockId, opcode: Opcode) -> InstrId {
    code.push_instruction(Instruction::new(InstrId::NONE, block, opcode))
}
