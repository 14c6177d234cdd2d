//! Tail-call promotion (spec.md §4.5):
//! escape analysis over a call's arguments and, for inline assembly, its parameters,
//! followed by rewriting a `CALL` immediately consumed by the function's `RETURN`
//! into a `TAIL_INVOKE`.

use std::ops::ControlFlow;

use indexmap::IndexSet;

use crate::error::OptResult;
use crate::function::{CodeContainer, Function};
use crate::ids::InstrId;
use crate::instruction::Opcode;
use crate::introspect::extract_inputs;
use crate::module::Module;

struct EscapeAnalysis {
    no_escapes: IndexSet<InstrId>,
    visited: IndexSet<InstrId>,
}

impl EscapeAnalysis {
    fn new() -> Self {
        EscapeAnalysis {
            no_escapes: IndexSet::new(),
            visited: IndexSet::new(),
        }
    }

    /// Recursive backward walk over `instr`'s inputs (phis not resolved: spec.md
    /// §4.5's escape analysis treats a phi as an opaque merge point rather than
    /// chasing into every incoming value). Returns `Break(())` the first time a
    /// definite escape is found — a positive early-exit signal rather than an error.
    fn check(&mut self, code: &CodeContainer, instr: InstrId) -> OptResult<ControlFlow<()>> {
        if self.visited.contains(&instr) || self.no_escapes.contains(&instr) {
            return Ok(ControlFlow::Continue(()));
        }
        self.visited.insert(instr);

        if matches!(
            code.instr(instr).opcode,
            Opcode::AllocLocal(..) | Opcode::StackAlloc { .. } | Opcode::ScopePush | Opcode::ScopePop
        ) {
            return Ok(ControlFlow::Break(()));
        }

        let mut escaped = false;
        extract_inputs(code, instr, false, &mut |input| {
            if let ControlFlow::Break(()) = self.check(code, input)? {
                escaped = true;
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        })?;
        if escaped {
            return Ok(ControlFlow::Break(()));
        }

        self.no_escapes.insert(instr);
        Ok(ControlFlow::Continue(()))
    }
}

/// Runs escape analysis for every instruction in `function` reachable from a call's
/// arguments or an inline-assembly node's parameters. Returns whether a tail call is
/// still possible (no escape was found and no `returns_twice` callee was invoked).
fn escape_analyze(
    module: &Module,
    function: &Function,
    config: &crate::config::OptimizerConfiguration,
    analysis: &mut EscapeAnalysis,
) -> OptResult<bool> {
    let code = &function.code;
    let mut tail_call_possible = true;

    for instr in &code.instructions {
        match instr.opcode {
            Opcode::Invoke { call, .. } | Opcode::TailInvoke { call, .. } => {
                let call_node = code.call(call);
                let declaration = &module.function(call_node.declaration).declaration;
                if declaration.returns_twice && !config.allow_returns_twice_tail_call {
                    tail_call_possible = false;
                    break;
                }
                for (i, &arg) in call_node.arguments.iter().enumerate() {
                    let by_reference = declaration
                        .parameter_by_reference
                        .get(i)
                        .copied()
                        .unwrap_or(false);
                    if by_reference {
                        continue; // passed by reference: the pointee, not the slot, would escape
                    }
                    analysis.visited.clear();
                    if let ControlFlow::Break(()) = analysis.check(code, arg)? {
                        tail_call_possible = false;
                        break;
                    }
                }
                if !tail_call_possible {
                    break;
                }
                // return_space is an out-pointer the callee writes through; it is
                // never treated as escaping the caller's own locals.
            }
            Opcode::InlineAssembly(asm_id) => {
                let asm = code.inline_asm(asm_id);
                for param in &asm.parameters {
                    for &candidate in &[param.read_ref, param.load_store_ref] {
                        if candidate.is_none() {
                            continue;
                        }
                        analysis.visited.clear();
                        if let ControlFlow::Break(()) = analysis.check(code, candidate)? {
                            tail_call_possible = false;
                            break;
                        }
                    }
                    if !tail_call_possible {
                        break;
                    }
                }
                if !tail_call_possible {
                    break;
                }
            }
            Opcode::Load { addr, width, flags, .. } => {
                if flags.volatile_access {
                    analysis.visited.clear();
                    if let ControlFlow::Break(()) = analysis.check(code, addr)? {
                        tail_call_possible = false;
                        break;
                    }
                }
                let _ = width;
            }
            Opcode::Store { addr, value, width, flags } => {
                analysis.visited.clear();
                if let ControlFlow::Break(()) = analysis.check(code, value)? {
                    tail_call_possible = false;
                    break;
                }
                if flags.volatile_access {
                    analysis.visited.clear();
                    if let ControlFlow::Break(()) = analysis.check(code, addr)? {
                        tail_call_possible = false;
                        break;
                    }
                }
                let _ = width;
            }
            Opcode::AtomicStore { addr, value, .. } => {
                // every atomic-store width, scalar or complex, always checks both
                // the address and the value (SPEC_FULL.md §3).
                for candidate in [addr, value] {
                    analysis.visited.clear();
                    if let ControlFlow::Break(()) = analysis.check(code, candidate)? {
                        tail_call_possible = false;
                        break;
                    }
                }
                if !tail_call_possible {
                    break;
                }
            }
            Opcode::AtomicCmpxchg { addr, expected, desired, .. } => {
                for candidate in [addr, expected, desired] {
                    analysis.visited.clear();
                    if let ControlFlow::Break(()) = analysis.check(code, candidate)? {
                        tail_call_possible = false;
                        break;
                    }
                }
                if !tail_call_possible {
                    break;
                }
            }
            _ => {}
        }
    }

    Ok(tail_call_possible)
}

/// Attempts to promote `block`'s tail `RETURN(INVOKE(...))` pattern into a single
/// `TAIL_INVOKE`, provided the invoke's result is used nowhere except that return and
/// escape analysis finds no captured local.
fn block_tail_call_apply(
    module: &Module,
    function: &mut Function,
    config: &crate::config::OptimizerConfiguration,
    block_id: crate::ids::BlockId,
) -> OptResult<bool> {
    let code = &function.code;
    let return_instr = code.control_tail_of(block_id);
    if return_instr.is_none() {
        return Ok(false);
    }
    let return_value = match code.instr(return_instr).opcode {
        Opcode::Return(v) => v,
        _ => return Ok(false),
    };
    if return_value.is_none() {
        return Ok(false);
    }

    // Walk backward past lifetime markers looking for the invoke this return reads.
    let mut cursor = code.instr(return_instr).control_prev;
    while cursor.is_some() && matches!(code.instr(cursor).opcode, Opcode::LocalLifetimeMark) {
        cursor = code.instr(cursor).control_prev;
    }
    let invoke_instr = cursor;
    if invoke_instr.is_none() || invoke_instr != return_value {
        return Ok(false);
    }
    let (virtual_call, indirect, call_id) = match code.instr(invoke_instr).opcode {
        Opcode::Invoke { virtual_call, indirect, call } => (virtual_call, indirect, call),
        _ => return Ok(false),
    };

    if crate::introspect::get_sole_use(code, invoke_instr)?.map(|u| u == return_instr) != Some(true) {
        return Ok(false);
    }

    let mut analysis = EscapeAnalysis::new();
    if !escape_analyze(module, function, config, &mut analysis)? {
        return Ok(false);
    }

    let code = &mut function.code;
    let call = code.call(call_id).clone();
    let new_call_id = code.new_call(call.declaration, indirect);
    {
        let stored = &mut code.calls[new_call_id.index()];
        stored.arguments = call.arguments;
        stored.return_space = call.return_space;
    }
    let tail_instr = crate::instruction::Instruction::new(
        InstrId::NONE,
        block_id,
        Opcode::TailInvoke { virtual_call, call: new_call_id },
    );
    code.drop_instruction(return_instr);
    code.drop_instruction(invoke_instr);
    let new_id = code.push_instruction(tail_instr);
    code.append_control(new_id);

    log::debug!("promoted invoke {invoke_instr} to a tail call in block {block_id}");
    Ok(true)
}

/// Runs tail-call promotion over every block in `function`. Returns the number of
/// calls promoted.
pub fn run(module: &Module, function: &mut Function, config: &crate::config::OptimizerConfiguration) -> OptResult<usize> {
    let mut promoted = 0;
    let block_ids: Vec<_> = function.code.blocks.iter().map(|b| b.id).collect();
    for block_id in block_ids {
        if block_tail_call_apply(module, function, config, block_id)? {
            promoted += 1;
        }
    }
    if promoted > 0 {
        log::debug!("tail-calls: promoted {promoted} call site(s)");
    }
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfiguration;
    use crate::ids::{BlockId, FunctionId, TypeId};
    use crate::nodes::FunctionDeclaration;
    use crate::testkit::new_function;

    fn callee(returns_twice: bool, parameter_by_reference: Vec<bool>) -> (Module, FunctionId) {
        let id = FunctionId(1);
        let declaration = FunctionDeclaration {
            id,
            name: "callee".to_string(),
            parameter_types: vec![TypeId(0); parameter_by_reference.len()],
            parameter_by_reference,
            result_type: None,
            variadic: false,
            returns_twice,
        };
        let mut module = Module::new();
        module.add_function(Function::new(id, declaration));
        (module, id)
    }

    fn push_invoke_return(function: &mut Function, block: BlockId, call: crate::ids::CallId) -> (InstrId, InstrId) {
        let invoke = crate::testkit::push(&mut function.code, block, Opcode::Invoke {
            virtual_call: false,
            indirect: InstrId::NONE,
            call,
        });
        let ret = crate::testkit::push(&mut function.code, block, Opcode::Return(invoke));
        (invoke, ret)
    }

    #[test]
    fn promotes_a_plain_call_immediately_returned() {
        let (module, callee_id) = callee(false, vec![]);
        let mut function = new_function();
        let block = function.code.new_block();
        function.code.entry_block = block;
        let call = function.code.new_call(callee_id, InstrId::NONE);
        push_invoke_return(&mut function, block, call);

        let config = OptimizerConfiguration::default();
        let promoted = run(&module, &mut function, &config).unwrap();
        assert_eq!(promoted, 1);

        let tail = function.code.control_tail_of(block);
        assert!(matches!(function.code.instr(tail).opcode, Opcode::TailInvoke { .. }));
    }

    #[test]
    fn an_escaping_local_argument_blocks_promotion() {
        let (module, callee_id) = callee(false, vec![false]);
        let mut function = new_function();
        let block = function.code.new_block();
        function.code.entry_block = block;
        let alloc = crate::testkit::push_value(&mut function.code, block, Opcode::AllocLocal(TypeId(0)));
        let call = function.code.new_call(callee_id, InstrId::NONE);
        function.code.calls[call.index()].arguments = vec![alloc];
        let (_invoke, ret) = push_invoke_return(&mut function, block, call);

        let config = OptimizerConfiguration::default();
        let promoted = run(&module, &mut function, &config).unwrap();
        assert_eq!(promoted, 0);
        assert_eq!(function.code.control_tail_of(block), ret);
        assert!(matches!(function.code.instr(ret).opcode, Opcode::Return(_)));
    }

    #[test]
    fn a_by_reference_argument_does_not_count_as_escaping() {
        let (module, callee_id) = callee(false, vec![true]);
        let mut function = new_function();
        let block = function.code.new_block();
        function.code.entry_block = block;
        let alloc = crate::testkit::push_value(&mut function.code, block, Opcode::AllocLocal(TypeId(0)));
        let call = function.code.new_call(callee_id, InstrId::NONE);
        function.code.calls[call.index()].arguments = vec![alloc];
        push_invoke_return(&mut function, block, call);

        let config = OptimizerConfiguration::default();
        let promoted = run(&module, &mut function, &config).unwrap();
        assert_eq!(promoted, 1);
    }

    #[test]
    fn returns_twice_blocks_promotion_unless_explicitly_allowed() {
        let (module, callee_id) = callee(true, vec![]);
        let mut function = new_function();
        let block = function.code.new_block();
        function.code.entry_block = block;
        let call = function.code.new_call(callee_id, InstrId::NONE);
        push_invoke_return(&mut function, block, call);

        let blocked = run(&module, &mut function.clone(), &OptimizerConfiguration::default()).unwrap();
        assert_eq!(blocked, 0);

        let allowed_config = OptimizerConfiguration {
            allow_returns_twice_tail_call: true,
        };
        let promoted = run(&module, &mut function, &allowed_config).unwrap();
        assert_eq!(promoted, 1);
    }
}
