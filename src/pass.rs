//! Pass plumbing (spec.md §6): each pass is a named `apply(module, function, config)`
//! function. Passes operate on one function at a time; a driver (not part of this
//! crate's scope — see spec.md §1's Non-goals) decides ordering and repetition.

use crate::config::OptimizerConfiguration;
use crate::error::OptResult;
use crate::function::Function;
use crate::ids::FunctionId;
use crate::module::Module;
use crate::{simplify, structure, tail_call};

pub struct Pass {
    pub name: &'static str,
    pub apply: fn(&Module, &mut Function, &OptimizerConfiguration) -> OptResult<()>,
}

fn apply_drop_dead_phi_links(_module: &Module, function: &mut Function, _config: &OptimizerConfiguration) -> OptResult<()> {
    structure::drop_dead_phi_links(&mut function.code)?;
    Ok(())
}

fn apply_op_simplify(_module: &Module, function: &mut Function, _config: &OptimizerConfiguration) -> OptResult<()> {
    simplify::run(function)?;
    Ok(())
}

fn apply_tail_calls(module: &Module, function: &mut Function, config: &OptimizerConfiguration) -> OptResult<()> {
    tail_call::run(module, function, config)?;
    Ok(())
}

pub const DROP_DEAD_PHI_LINKS: Pass = Pass {
    name: "drop-dead-phi-links",
    apply: apply_drop_dead_phi_links,
};

pub const OP_SIMPLIFY: Pass = Pass {
    name: "op-simplify",
    apply: apply_op_simplify,
};

pub const TAIL_CALLS: Pass = Pass {
    name: "tail-calls",
    apply: apply_tail_calls,
};

/// The canonical pass order this crate exposes (spec.md §6 does not mandate a
/// pipeline order beyond "a driver selects and sequences passes"; this is the
/// order that exercises each pass's preconditions correctly: simplification first
/// so the tail-call promoter sees folded branches and select expressions, then
/// dead-phi-link cleanup for whatever CFG edges simplification removed, then
/// tail-call promotion last since it depends on a stable `RETURN(INVOKE(..))`
/// shape that earlier passes should not further disturb).
pub const DEFAULT_PIPELINE: &[Pass] = &[OP_SIMPLIFY, DROP_DEAD_PHI_LINKS, TAIL_CALLS];

/// Runs every pass in `pipeline` over one function, in order.
pub fn run_pipeline(module: &mut Module, function_id: FunctionId, config: &OptimizerConfiguration, pipeline: &[Pass]) -> OptResult<()> {
    for pass in pipeline {
        log::debug!("running pass `{}`", pass.name);
        // Passes take a read-only `Module` (cross-function declarations, e.g. for
        // tail-calls) alongside the one `Function` they mutate; since both live in
        // the same `Module`, the function is cloned out, run against the outer
        // module, then written back.
        let mut function = module.function(function_id).clone();
        (pass.apply)(module, &mut function, config)?;
        module.add_function(function);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Opcode;
    use crate::testkit::{new_function, push, push_value};
    use crate::value::IntWidth;

    #[test]
    fn default_pipeline_simplifies_before_cleaning_phis_before_tail_calls() {
        let names: Vec<&str> = DEFAULT_PIPELINE.iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["op-simplify", "drop-dead-phi-links", "tail-calls"]);
    }

    #[test]
    fn run_pipeline_folds_a_double_negation_and_writes_the_function_back() {
        let mut function = new_function();
        let block = function.code.new_block();
        function.code.entry_block = block;
        let x = push_value(&mut function.code, block, Opcode::UIntConst(IntWidth::W8, 1));
        let n1 = push_value(&mut function.code, block, Opcode::BoolNot(IntWidth::W8, x));
        let n2 = push_value(&mut function.code, block, Opcode::BoolNot(IntWidth::W8, n1));
        push(&mut function.code, block, Opcode::Return(n2));

        let function_id = function.id;
        let mut module = Module::new();
        module.add_function(function);

        let config = OptimizerConfiguration::default();
        run_pipeline(&mut module, function_id, &config, DEFAULT_PIPELINE).unwrap();

        let updated = module.function(function_id);
        let ret = updated.code.control_tail_of(block);
        match updated.code.instr(ret).opcode {
            Opcode::Return(v) => assert_eq!(v, x),
            other => panic!("expected a return, got {other:?}"),
        }
    }
}
