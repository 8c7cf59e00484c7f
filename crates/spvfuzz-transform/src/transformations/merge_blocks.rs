//! Merge a block into its unique predecessor.

use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, IrContext, Module, Opcode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeBlocks {
    /// The block to absorb into its predecessor
    pub block: Id,
}

impl MergeBlocks {
    pub fn new(block: Id) -> Self {
        Self { block }
    }

    fn predecessor(&self, ir: &IrContext) -> Option<Id> {
        let analysis = ir.analysis_for_block(self.block)?;
        match analysis.cfg.predecessors(self.block) {
            [single] if *single != self.block => Some(*single),
            _ => None,
        }
    }

    fn rewrite(&self, module: &mut Module, function: Id, predecessor: Id) -> Result<()> {
        let func = module
            .function_mut(function)
            .ok_or_else(|| missing("Function", function))?;
        let index = func
            .block_index(self.block)
            .ok_or_else(|| missing("Block", self.block))?;
        let absorbed = func.blocks.remove(index);

        // Each phi has a single incoming value, which replaces it
        let substitutions: Vec<(Id, Id)> = absorbed
            .phis()
            .filter_map(|phi| Some((phi.result_id?, phi.phi_incoming().first()?.0)))
            .collect();

        let pred = func
            .block_mut(predecessor)
            .ok_or_else(|| missing("Block", predecessor))?;
        pred.instructions.pop();
        let merge = pred
            .instructions
            .last()
            .filter(|inst| inst.opcode.is_merge())
            .cloned();
        if merge.is_some() {
            pred.instructions.pop();
        }
        let body_start = absorbed.first_non_phi_index();
        pred.instructions
            .extend(absorbed.instructions.into_iter().skip(body_start));
        if let Some(merge) = merge {
            let at = pred.instructions.len().saturating_sub(1);
            pred.instructions.insert(at, merge);
        }
        if pred.terminator().is_none() {
            return Err(contract(format!("merged block {} has no terminator", predecessor)));
        }

        for block in &mut func.blocks {
            for inst in &mut block.instructions {
                for (phi, value) in &substitutions {
                    inst.replace_id_operands(*phi, *value);
                }
                // Merge and continue targets, and phi parents in successors
                inst.replace_id_operands(self.block, predecessor);
            }
        }
        Ok(())
    }
}

impl Transformation for MergeBlocks {
    fn name(&self) -> &'static str {
        "merge_blocks"
    }

    fn is_applicable(&self, ir: &IrContext, _ctx: &TransformationContext) -> bool {
        let module = ir.module();
        let Some(function) = ir.function_of_block(self.block) else {
            return false;
        };
        let Some(analysis) = util::structured_analysis(ir, self.block) else {
            return false;
        };
        let Some(structure) = analysis.structure() else {
            return false;
        };
        if analysis.cfg.entry() == Some(self.block) || !analysis.cfg.is_reachable(self.block) {
            return false;
        }
        let Some(predecessor) = self.predecessor(ir) else {
            return false;
        };
        if module.block(predecessor).and_then(util::unconditional_target) != Some(self.block) {
            return false;
        }

        if structure.is_loop_header(self.block) {
            return false;
        }
        if structure.merge_block(predecessor) == Some(self.block) {
            return false;
        }
        let pred_is_merge = structure.is_merge_block(predecessor);
        if pred_is_merge && structure.is_merge_block(self.block) {
            return false;
        }
        if pred_is_merge && structure.is_continue_target(self.block) {
            return false;
        }
        if structure.is_header(predecessor) && structure.is_header(self.block) {
            return false;
        }
        let is_switch_case = analysis.cfg.predecessors(predecessor).iter().any(|p| {
            module
                .block(*p)
                .and_then(|b| b.terminator())
                .map_or(false, |t| t.opcode == Opcode::Switch)
        });
        if is_switch_case
            && (structure.is_merge_block(self.block) || structure.is_continue_target(self.block))
        {
            return false;
        }

        util::trial_is_valid(ir, function, |m| self.rewrite(m, function, predecessor))
    }

    fn apply(&self, ir: &mut IrContext, _ctx: &mut TransformationContext) -> Result<()> {
        let function = ir
            .function_of_block(self.block)
            .ok_or_else(|| missing("Block", self.block))?;
        let predecessor = self
            .predecessor(ir)
            .ok_or_else(|| contract(format!("block {} has no unique predecessor", self.block)))?;
        self.rewrite(ir.module_mut(), function, predecessor)
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::MergeBlocks(self.clone())
    }
}
