use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, Instruction, IrContext, Opcode};

/// Negate the condition of a conditional branch and swap its targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapConditionalBranchOperands {
    pub block: Id,
    /// Result of the inserted `LogicalNot`
    pub fresh_id: Id,
}

impl SwapConditionalBranchOperands {
    pub fn new(block: Id, fresh_id: Id) -> Self {
        Self { block, fresh_id }
    }

    /// `(condition, true target, false target)` of the branch ending the block
    fn branch(&self, ir: &IrContext) -> Option<(Id, Id, Id)> {
        let terminator = ir.module().block(self.block)?.terminator()?;
        if terminator.opcode != Opcode::BranchConditional {
            return None;
        }
        Some((
            terminator.id_operand(0)?,
            terminator.id_operand(1)?,
            terminator.id_operand(2)?,
        ))
    }
}

impl Transformation for SwapConditionalBranchOperands {
    fn name(&self) -> &'static str {
        "swap_conditional_branch_operands"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        ctx.is_fresh_id(ir, self.fresh_id)
            && self
                .branch(ir)
                .and_then(|(condition, _, _)| ir.type_of(condition))
                .is_some()
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let (condition, if_true, if_false) = self
            .branch(ir)
            .ok_or_else(|| contract(format!("block {} does not end in a conditional branch", self.block)))?;
        let bool_type = ir
            .type_of(condition)
            .ok_or_else(|| missing("Condition", condition))?;
        let module = ir.module_mut();
        let block = module.block_mut(self.block).ok_or_else(|| missing("Block", self.block))?;
        let at = block.insertion_point_before_terminator();
        block.instructions.insert(
            at,
            Instruction::op(Opcode::LogicalNot, bool_type, self.fresh_id, &[condition]),
        );
        if let Some(terminator) = block.terminator_mut() {
            *terminator = Instruction::branch_conditional(self.fresh_id, if_false, if_true);
        }
        module.claim_id(self.fresh_id);
        ctx.facts
            .add_id_equation(self.fresh_id, Opcode::LogicalNot, vec![condition]);
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::SwapConditionalBranchOperands(self.clone())
    }
}
