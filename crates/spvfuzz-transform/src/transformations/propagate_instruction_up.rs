//! Hoist an instruction into every predecessor of its block and replace it
//! with a phi that selects the copy from the incoming edge.

use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{BasicBlock, Id, Instruction, IrContext, Module};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagateInstructionUp {
    pub block: Id,
    /// `(predecessor, fresh id)` for the copy placed in each predecessor
    pub predecessor_id_map: Vec<(Id, Id)>,
}

/// The copy a predecessor receives
#[derive(Debug, Clone)]
struct Hoisted {
    predecessor: Id,
    instruction: Instruction,
}

#[derive(Debug, Clone)]
struct Plan {
    function: Id,
    index: usize,
    original: Instruction,
    copies: Vec<Hoisted>,
}

/// First non-phi instruction of `block` that is pure, does not produce a
/// pointer, and whose operands defined in the block are all phis
fn propagatable_index(module: &Module, block: &BasicBlock) -> Option<usize> {
    let phis: HashSet<Id> = block.phis().filter_map(|p| p.result_id).collect();
    let defined_here: HashSet<Id> = block.instructions.iter().filter_map(|i| i.result_id).collect();
    let end = block.insertion_point_before_terminator();
    (block.first_non_phi_index()..end).find(|i| {
        let inst = &block.instructions[*i];
        inst.opcode.is_pure()
            && inst.result_id.is_some()
            && inst.result_type.map_or(false, |t| !module.is_pointer_type(t))
            && inst
                .id_operands()
                .all(|id| !defined_here.contains(&id) || phis.contains(&id))
    })
}

impl PropagateInstructionUp {
    pub fn new(block: Id, predecessor_id_map: Vec<(Id, Id)>) -> Self {
        Self {
            block,
            predecessor_id_map,
        }
    }

    fn plan(&self, ir: &IrContext, ctx: &TransformationContext) -> Option<Plan> {
        let function = ir.function_of_block(self.block)?;
        let analysis = util::structured_analysis(ir, self.block)?;
        if !analysis.cfg.is_reachable(self.block) {
            return None;
        }
        let preds = analysis.cfg.predecessors(self.block);
        if preds.is_empty() || preds.contains(&self.block) {
            return None;
        }
        let map: HashMap<Id, Id> = self.predecessor_id_map.iter().copied().collect();
        let expected: HashSet<Id> = preds.iter().copied().collect();
        if map.len() != self.predecessor_id_map.len()
            || map.keys().copied().collect::<HashSet<Id>>() != expected
        {
            return None;
        }
        let fresh: Vec<Id> = self.predecessor_id_map.iter().map(|(_, id)| *id).collect();
        if !ctx.are_fresh_and_distinct(ir, &fresh) {
            return None;
        }

        let block = ir.module().block(self.block)?;
        let index = propagatable_index(ir.module(), block)?;
        let original = block.instructions[index].clone();

        let mut copies = Vec::with_capacity(preds.len());
        for pred in preds {
            let mut copy = original.clone();
            copy.result_id = map.get(pred).copied();
            for phi in block.phis() {
                let Some(phi_id) = phi.result_id else {
                    continue;
                };
                if copy.id_operands().any(|id| id == phi_id) {
                    copy.replace_id_operands(phi_id, phi.phi_value_for(*pred)?);
                }
            }
            if !copy.id_operands().all(|id| ir.is_available_at_end(id, *pred)) {
                return None;
            }
            copies.push(Hoisted {
                predecessor: *pred,
                instruction: copy,
            });
        }
        Some(Plan {
            function,
            index,
            original,
            copies,
        })
    }

    fn rewrite(&self, module: &mut Module, plan: &Plan) -> Result<()> {
        let func = module
            .function_mut(plan.function)
            .ok_or_else(|| missing("Function", plan.function))?;
        let mut incoming = Vec::with_capacity(plan.copies.len());
        for copy in &plan.copies {
            let pred = func
                .block_mut(copy.predecessor)
                .ok_or_else(|| missing("Block", copy.predecessor))?;
            let at = pred.insertion_point_before_terminator();
            pred.instructions.insert(at, copy.instruction.clone());
            let value = copy
                .instruction
                .result_id
                .ok_or_else(|| contract("propagated copy has no result id"))?;
            incoming.push((value, copy.predecessor));
        }

        let block = func
            .block_mut(self.block)
            .ok_or_else(|| missing("Block", self.block))?;
        block.instructions.remove(plan.index);
        let (Some(ty), Some(id)) = (plan.original.result_type, plan.original.result_id) else {
            return Err(contract("propagated instruction has no result"));
        };
        let at = block.first_non_phi_index();
        block.instructions.insert(at, Instruction::phi(ty, id, &incoming));

        let fresh: Vec<Id> = incoming.iter().map(|(value, _)| *value).collect();
        util::claim_ids(module, &fresh);
        Ok(())
    }
}

impl Transformation for PropagateInstructionUp {
    fn name(&self) -> &'static str {
        "propagate_instruction_up"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        let Some(plan) = self.plan(ir, ctx) else {
            return false;
        };
        util::trial_is_valid(ir, plan.function, |m| self.rewrite(m, &plan))
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let plan = self
            .plan(ir, ctx)
            .ok_or_else(|| contract(format!("nothing to propagate up in block {}", self.block)))?;
        self.rewrite(ir.module_mut(), &plan)?;
        if let Some(original) = plan.original.result_id {
            if ctx.facts.is_id_irrelevant(original) {
                for copy in &plan.copies {
                    if let Some(id) = copy.instruction.result_id {
                        ctx.facts.add_irrelevant_id(id);
                    }
                }
            }
        }
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::PropagateInstructionUp(self.clone())
    }
}
