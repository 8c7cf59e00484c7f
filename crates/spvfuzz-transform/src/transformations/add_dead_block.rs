//! Turn an unconditional branch into a selection whose untaken arm is a new
//! dead block.

use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{BasicBlock, Id, Instruction, IrContext, Module};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDeadBlock {
    pub fresh_id: Id,
    pub existing_block: Id,
    /// Value of the boolean constant guarding the new block; the dead arm is
    /// the one this value never selects
    pub condition_value: bool,
}

impl AddDeadBlock {
    pub fn new(fresh_id: Id, existing_block: Id, condition_value: bool) -> Self {
        Self {
            fresh_id,
            existing_block,
            condition_value,
        }
    }

    fn rewrite(&self, module: &mut Module, function: Id) -> Result<()> {
        let condition = module
            .find_bool_constant(self.condition_value)
            .ok_or_else(|| contract(format!("boolean constant {} is missing", self.condition_value)))?;
        let block = module
            .block_mut(self.existing_block)
            .ok_or_else(|| missing("Block", self.existing_block))?;
        let successor = util::unconditional_target(block)
            .ok_or_else(|| contract(format!("block {} does not end in a branch", self.existing_block)))?;
        let (if_true, if_false) = if self.condition_value {
            (successor, self.fresh_id)
        } else {
            (self.fresh_id, successor)
        };
        block.instructions.pop();
        block.add_instruction(Instruction::selection_merge(successor));
        block.add_instruction(Instruction::branch_conditional(condition, if_true, if_false));

        // The dead block forwards the same phi values as the existing edge
        let target = module.block_mut(successor).ok_or_else(|| missing("Block", successor))?;
        for phi in target.phis_mut() {
            if let Some(value) = phi.phi_value_for(self.existing_block) {
                phi.add_phi_incoming(value, self.fresh_id);
            }
        }

        let func = module
            .function_mut(function)
            .ok_or_else(|| missing("Function", function))?;
        let at = func
            .block_index(self.existing_block)
            .ok_or_else(|| missing("Block", self.existing_block))?;
        func.blocks.insert(
            at + 1,
            BasicBlock::with_instructions(self.fresh_id, vec![Instruction::branch(successor)]),
        );
        module.claim_id(self.fresh_id);
        Ok(())
    }
}

impl Transformation for AddDeadBlock {
    fn name(&self) -> &'static str {
        "add_dead_block"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        let module = ir.module();
        if !ctx.is_fresh_id(ir, self.fresh_id) || module.find_bool_constant(self.condition_value).is_none() {
            return false;
        }
        let Some(function) = ir.function_of_block(self.existing_block) else {
            return false;
        };
        let Some(analysis) = util::structured_analysis(ir, self.existing_block) else {
            return false;
        };
        let Some(structure) = analysis.structure() else {
            return false;
        };
        if !analysis.cfg.is_reachable(self.existing_block) {
            return false;
        }
        let Some(block) = module.block(self.existing_block) else {
            return false;
        };
        let Some(successor) = util::unconditional_target(block) else {
            return false;
        };
        if block.is_header() || successor == self.existing_block {
            return false;
        }
        if structure.is_merge_block(successor)
            || structure.is_continue_target(successor)
            || structure.is_loop_header(successor)
        {
            return false;
        }
        util::trial_is_valid(ir, function, |m| self.rewrite(m, function))
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let function = ir
            .function_of_block(self.existing_block)
            .ok_or_else(|| missing("Block", self.existing_block))?;
        self.rewrite(ir.module_mut(), function)?;
        ctx.facts.add_dead_block(self.fresh_id);
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::AddDeadBlock(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn test_dead_arm_before_phi() {
        let mut ir = IrContext::new(chain_module());
        let mut ctx = context_for(&ir);
        apply_and_validate(&AddDeadBlock::new(100, ENTRY, true), &mut ir, &mut ctx);

        let func = &ir.module().functions[0];
        let layout: Vec<Id> = func.blocks.iter().map(|b| b.id).collect();
        assert_eq!(layout, vec![ENTRY, 100, 31, 32]);
        let entry = func.block(ENTRY).unwrap();
        assert_eq!(entry.merge_instruction(), Some(&Instruction::selection_merge(31)));
        assert_eq!(entry.terminator(), Some(&Instruction::branch_conditional(TRUE, 31, 100)));
        let phi = &func.block(31).unwrap().instructions[0];
        assert_eq!(phi.phi_value_for(100), Some(41));
        assert!(ctx.facts.is_block_dead(100));
    }

    #[test]
    fn test_false_condition_swaps_arms() {
        let mut ir = IrContext::new(loop_module());
        let mut ctx = context_for(&ir);
        apply_and_validate(&AddDeadBlock::new(100, BODY, false), &mut ir, &mut ctx);
        let body = ir.module().block(BODY).unwrap();
        assert_eq!(body.terminator(), Some(&Instruction::branch_conditional(FALSE, 100, BODY2)));
    }

    #[test]
    fn test_rejections() {
        let ir = IrContext::new(diamond_module());
        let ctx = context_for(&ir);
        // Successor is a merge block
        assert!(!AddDeadBlock::new(100, LEFT, true).is_applicable(&ir, &ctx));
        // Already a header
        assert!(!AddDeadBlock::new(100, ENTRY, true).is_applicable(&ir, &ctx));

        let ir = IrContext::new(loop_module());
        let ctx = context_for(&ir);
        // Branch to the continue target, and the back edge
        assert!(!AddDeadBlock::new(100, BODY2, true).is_applicable(&ir, &ctx));
        assert!(!AddDeadBlock::new(100, CONTINUE, true).is_applicable(&ir, &ctx));
        // Branch into a loop header
        assert!(!AddDeadBlock::new(100, ENTRY, true).is_applicable(&ir, &ctx));
        // Id in use
        assert!(!AddDeadBlock::new(VAR, BODY, true).is_applicable(&ir, &ctx));
    }
}
