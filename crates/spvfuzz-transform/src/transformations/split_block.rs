use crate::descriptor::InstructionDescriptor;
use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{BasicBlock, Id, Instruction, IrContext};

/// Split a block before an instruction. The tail moves to a new block that
/// the head branches to unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitBlock {
    /// First instruction of the new block
    pub instruction: InstructionDescriptor,
    pub fresh_id: Id,
}

impl SplitBlock {
    pub fn new(instruction: InstructionDescriptor, fresh_id: Id) -> Self {
        Self {
            instruction,
            fresh_id,
        }
    }
}

impl Transformation for SplitBlock {
    fn name(&self) -> &'static str {
        "split_block"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        if !ctx.is_fresh_id(ir, self.fresh_id) {
            return false;
        }
        let Some(pos) = self.instruction.resolve(ir) else {
            return false;
        };
        let Some(block) = ir.module().block(pos.block) else {
            return false;
        };
        // The back edge must keep targeting the block holding the merge
        if block.is_loop_header() {
            return false;
        }
        util::can_insert_before(ir, pos.block, pos.index)
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let pos = self
            .instruction
            .resolve(ir)
            .ok_or_else(|| contract(format!("{:?} does not resolve", self.instruction)))?;
        let module = ir.module_mut();
        let func = module
            .function_mut(pos.function)
            .ok_or_else(|| missing("Function", pos.function))?;
        let index = func
            .block_index(pos.block)
            .ok_or_else(|| missing("Block", pos.block))?;

        let head = &mut func.blocks[index];
        let tail = head.instructions.split_off(pos.index);
        head.add_instruction(Instruction::branch(self.fresh_id));
        let new_block = BasicBlock::with_instructions(self.fresh_id, tail);
        let successors = new_block.successors();
        func.blocks.insert(index + 1, new_block);

        for successor in successors {
            if let Some(block) = func.block_mut(successor) {
                for phi in block.phis_mut() {
                    phi.replace_phi_parent(pos.block, self.fresh_id);
                }
            }
        }
        module.claim_id(self.fresh_id);

        if ctx.facts.is_block_dead(pos.block) {
            ctx.facts.add_dead_block(self.fresh_id);
        }
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::SplitBlock(self.clone())
    }
}
