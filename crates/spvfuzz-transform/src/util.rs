//! Helpers shared by several transformations.

use spvfuzz_core::{Error, Result};
use spvfuzz_ir::{
    validation, BasicBlock, FunctionAnalysis, Id, Instruction, IrContext, Module, Opcode,
};
use std::sync::Arc;

pub(crate) fn contract(message: impl Into<String>) -> Error {
    Error::ContractViolation(message.into())
}

pub(crate) fn missing(what: &str, id: Id) -> Error {
    contract(format!("{} {} does not exist", what, id))
}

/// Analyses of the function containing `block`, provided its structured
/// control flow is supported
pub(crate) fn structured_analysis(ir: &IrContext, block: Id) -> Option<Arc<FunctionAnalysis>> {
    let analysis = ir.analysis_for_block(block)?;
    analysis.structure()?;
    Some(analysis)
}

/// Target of an unconditional branch ending `block`
pub(crate) fn unconditional_target(block: &BasicBlock) -> Option<Id> {
    block
        .terminator()
        .filter(|t| t.opcode == Opcode::Branch)
        .and_then(|t| t.id_operand(0))
}

/// Whether `values` can extend the phis of `target` for a new edge from
/// `from`: one value per phi, of the phi's type, available at the end of
/// `from`
pub(crate) fn phi_values_fit(ir: &IrContext, target: Id, from: Id, values: &[Id]) -> bool {
    let Some(block) = ir.module().block(target) else {
        return false;
    };
    let phis: Vec<&Instruction> = block.phis().collect();
    phis.len() == values.len()
        && phis.iter().zip(values).all(|(phi, value)| {
            phi.result_type.is_some()
                && ir.type_of(*value) == phi.result_type
                && ir.is_available_at_end(*value, from)
        })
}

/// Turn the unconditional branch ending `from` into a conditional branch on
/// the boolean constant `condition_value` whose untaken arm goes to `to`
pub(crate) fn add_dead_edge(
    module: &mut Module,
    from: Id,
    to: Id,
    condition_value: bool,
    phi_ids: &[Id],
) -> Result<()> {
    let condition = module
        .find_bool_constant(condition_value)
        .ok_or_else(|| contract(format!("boolean constant {condition_value} is missing")))?;
    let block = module.block_mut(from).ok_or_else(|| missing("Block", from))?;
    let successor = unconditional_target(block)
        .ok_or_else(|| contract(format!("block {from} does not end in a branch")))?;
    let (if_true, if_false) = if condition_value {
        (successor, to)
    } else {
        (to, successor)
    };
    if let Some(terminator) = block.terminator_mut() {
        *terminator = Instruction::branch_conditional(condition, if_true, if_false);
    }
    let target = module.block_mut(to).ok_or_else(|| missing("Block", to))?;
    extend_phis(target, from, phi_ids);
    Ok(())
}

pub(crate) fn extend_phis(block: &mut BasicBlock, from: Id, values: &[Id]) {
    for (phi, value) in block.phis_mut().zip(values) {
        phi.add_phi_incoming(*value, from);
    }
}

/// Raise the module's id bound to cover freshly introduced ids
pub(crate) fn claim_ids(module: &mut Module, ids: &[Id]) {
    for id in ids {
        module.claim_id(*id);
    }
}

/// Run `edit` on a copy of the module and validate the edited function
pub(crate) fn trial_is_valid<F>(ir: &IrContext, function: Id, edit: F) -> bool
where
    F: FnOnce(&mut Module) -> Result<()>,
{
    let mut trial = ir.clone();
    if edit(trial.module_mut()).is_err() {
        return false;
    }
    match validation::validate_function(&trial, function) {
        Ok(()) => true,
        Err(e) => {
            tracing::trace!(function, error = %e, "trial edit rejected");
            false
        }
    }
}

/// Whether an instruction may be inserted right before position `index`
/// of `block`
pub(crate) fn can_insert_before(ir: &IrContext, block: Id, index: usize) -> bool {
    let module = ir.module();
    let Some(b) = module.block(block) else {
        return false;
    };
    let Some(target) = b.instructions.get(index) else {
        return false;
    };
    if target.opcode == Opcode::Phi {
        return false;
    }
    let is_entry = ir
        .function_of_block(block)
        .and_then(|f| module.function(f))
        .and_then(|f| f.entry())
        .map_or(false, |entry| entry.id == block);
    if is_entry && index < b.first_body_index() {
        return false;
    }
    // Nothing may separate a merge instruction from its terminator
    !(target.is_terminator() && b.merge_index().is_some())
}

/// Whether `id` names a value: it is defined by an instruction with a
/// result type that is not a function
pub(crate) fn is_value(ir: &IrContext, id: Id) -> bool {
    ir.get_def(id).map_or(false, |inst| {
        inst.result_type.is_some() && inst.opcode != Opcode::Function
    })
}
