use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, IrContext};

/// Swap a block with the block that follows it in the layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveBlockDown {
    pub block: Id,
}

impl MoveBlockDown {
    pub fn new(block: Id) -> Self {
        Self { block }
    }
}

impl Transformation for MoveBlockDown {
    fn name(&self) -> &'static str {
        "move_block_down"
    }

    fn is_applicable(&self, ir: &IrContext, _ctx: &TransformationContext) -> bool {
        let Some(function) = ir.function_of_block(self.block).and_then(|f| ir.module().function(f)) else {
            return false;
        };
        let Some(index) = function.block_index(self.block) else {
            return false;
        };
        if index == 0 {
            return false;
        }
        let Some(next) = function.blocks.get(index + 1) else {
            return false;
        };
        // The next block would otherwise precede its dominator
        ir.analysis(function.id())
            .map_or(false, |a| !a.dominators.dominates(self.block, next.id))
    }

    fn apply(&self, ir: &mut IrContext, _ctx: &mut TransformationContext) -> Result<()> {
        let function = ir
            .function_of_block(self.block)
            .ok_or_else(|| missing("Block", self.block))?;
        let func = ir
            .module_mut()
            .function_mut(function)
            .ok_or_else(|| missing("Function", function))?;
        let index = func
            .block_index(self.block)
            .ok_or_else(|| missing("Block", self.block))?;
        if index == 0 || index + 1 >= func.blocks.len() {
            return Err(contract(format!("block {} cannot move down", self.block)));
        }
        func.blocks.swap(index, index + 1);
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::MoveBlockDown(self.clone())
    }
}
