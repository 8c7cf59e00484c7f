//! Replace a phi whose incoming values are all computed by the same kind of
//! instruction in the respective predecessors with a single instruction at
//! the start of the block. Operands that differ between the predecessors
//! are read through an existing phi of the block.
//!
//! This undoes `PropagateInstructionUp`.

use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{BasicBlock, Id, Instruction, IrContext, Module, Opcode, Operand};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagateInstructionIntoBlock {
    pub block: Id,
    /// Result id of the phi to replace. The new instruction keeps it.
    pub phi_id: Id,
}

#[derive(Debug, Clone)]
struct Plan {
    function: Id,
    instruction: Instruction,
    /// `(predecessor, definition)` of copies nothing else reads
    removable: Vec<(Id, Id)>,
}

/// Phi of `block` other than `exclude` that selects `values[i]` along the
/// edge from `parents[i]` for every `i`
fn matching_phi(block: &BasicBlock, exclude: Id, parents: &[Id], values: &[Id]) -> Option<Id> {
    block
        .phis()
        .filter(|phi| phi.result_id != Some(exclude))
        .find(|phi| {
            parents
                .iter()
                .zip(values)
                .all(|(parent, value)| phi.phi_value_for(*parent) == Some(*value))
        })
        .and_then(|phi| phi.result_id)
}

impl PropagateInstructionIntoBlock {
    pub fn new(block: Id, phi_id: Id) -> Self {
        Self { block, phi_id }
    }

    fn plan(&self, ir: &IrContext) -> Option<Plan> {
        let function = ir.function_of_block(self.block)?;
        let analysis = util::structured_analysis(ir, self.block)?;
        if !analysis.cfg.is_reachable(self.block) {
            return None;
        }
        let block = ir.module().block(self.block)?;
        let phi = block.phis().find(|p| p.result_id == Some(self.phi_id))?;
        let result_type = phi.result_type?;
        let incoming = phi.phi_incoming();
        if incoming.is_empty() {
            return None;
        }

        let mut parents = Vec::with_capacity(incoming.len());
        let mut copies = Vec::with_capacity(incoming.len());
        for (value, parent) in &incoming {
            if ir.enclosing_block(*value).map(|(_, b)| b) != Some(*parent) {
                return None;
            }
            let def = ir.get_def(*value)?;
            if def.opcode == Opcode::Phi || !def.opcode.is_pure() || def.result_type != Some(result_type) {
                return None;
            }
            parents.push(*parent);
            copies.push(def);
        }

        let template = copies[0];
        if copies
            .iter()
            .any(|c| c.opcode != template.opcode || c.operands.len() != template.operands.len())
        {
            return None;
        }

        let at = block.first_non_phi_index();
        let mut operands = Vec::with_capacity(template.operands.len());
        for (slot, operand) in template.operands.iter().enumerate() {
            let column: Vec<&Operand> = copies.iter().map(|c| &c.operands[slot]).collect();
            match operand {
                Operand::Literal(_) => {
                    if column.iter().any(|o| *o != operand) {
                        return None;
                    }
                    operands.push(*operand);
                }
                Operand::Id(shared) if column.iter().all(|o| *o == operand) => {
                    if *shared == self.phi_id || !ir.is_available_before(*shared, self.block, at) {
                        return None;
                    }
                    operands.push(*operand);
                }
                Operand::Id(_) => {
                    let values: Option<Vec<Id>> = column.iter().map(|o| o.as_id()).collect();
                    let phi = matching_phi(block, self.phi_id, &parents, &values?)?;
                    operands.push(Operand::Id(phi));
                }
            }
        }

        let mut instruction = template.clone();
        instruction.result_id = Some(self.phi_id);
        instruction.operands = operands;

        let removable = incoming
            .iter()
            .filter(|(value, _)| {
                ir.uses(*value).iter().all(|site| {
                    ir.instruction_at(site.user).and_then(|i| i.result_id) == Some(self.phi_id)
                })
            })
            .map(|(value, parent)| (*parent, *value))
            .collect();

        Some(Plan {
            function,
            instruction,
            removable,
        })
    }

    fn rewrite(&self, module: &mut Module, plan: &Plan) -> Result<()> {
        let func = module
            .function_mut(plan.function)
            .ok_or_else(|| missing("Function", plan.function))?;
        for (parent, value) in &plan.removable {
            func.block_mut(*parent)
                .ok_or_else(|| missing("Block", *parent))?
                .instructions
                .retain(|inst| inst.result_id != Some(*value));
        }

        let block = func
            .block_mut(self.block)
            .ok_or_else(|| missing("Block", self.block))?;
        let index = block
            .position_of(self.phi_id)
            .ok_or_else(|| contract(format!("phi {} is not in block {}", self.phi_id, self.block)))?;
        block.instructions.remove(index);
        let at = block.first_non_phi_index();
        block.instructions.insert(at, plan.instruction.clone());
        Ok(())
    }
}

impl Transformation for PropagateInstructionIntoBlock {
    fn name(&self) -> &'static str {
        "propagate_instruction_into_block"
    }

    fn is_applicable(&self, ir: &IrContext, _ctx: &TransformationContext) -> bool {
        let Some(plan) = self.plan(ir) else {
            return false;
        };
        util::trial_is_valid(ir, plan.function, |m| self.rewrite(m, &plan))
    }

    fn apply(&self, ir: &mut IrContext, _ctx: &mut TransformationContext) -> Result<()> {
        let plan = self
            .plan(ir)
            .ok_or_else(|| contract(format!("phi {} cannot be replaced", self.phi_id)))?;
        debug!(block = self.block, removed = plan.removable.len(), "collapsing phi");
        self.rewrite(ir.module_mut(), &plan)
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::PropagateInstructionIntoBlock(self.clone())
    }
}
