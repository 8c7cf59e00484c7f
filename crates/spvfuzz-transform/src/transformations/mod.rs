//! The transformation catalogue and its serializable message form.

mod add_constant_boolean;
mod add_dead_block;
mod add_dead_break;
mod add_dead_continue;
mod add_local_variable;
mod add_synonym;
mod add_type_boolean;
mod equation_instruction;
mod inline_function;
mod merge_blocks;
mod move_block_down;
mod move_instruction_down;
mod propagate_instruction_down;
mod propagate_instruction_into_block;
mod propagate_instruction_up;
mod replace_branch_from_dead_block_with_exit;
mod replace_copy_object_with_store_load;
mod replace_id_with_synonym;
mod split_block;
mod swap_conditional_branch_operands;

pub use add_constant_boolean::AddConstantBoolean;
pub use add_dead_block::AddDeadBlock;
pub use add_dead_break::AddDeadBreak;
pub use add_dead_continue::AddDeadContinue;
pub use add_local_variable::AddLocalVariable;
pub use add_synonym::AddSynonym;
pub use add_type_boolean::AddTypeBoolean;
pub use equation_instruction::EquationInstruction;
pub use inline_function::InlineFunction;
pub use merge_blocks::MergeBlocks;
pub use move_block_down::MoveBlockDown;
pub use move_instruction_down::MoveInstructionDown;
pub use propagate_instruction_down::PropagateInstructionDown;
pub use propagate_instruction_into_block::PropagateInstructionIntoBlock;
pub use propagate_instruction_up::PropagateInstructionUp;
pub use replace_branch_from_dead_block_with_exit::ReplaceBranchFromDeadBlockWithExit;
pub use replace_copy_object_with_store_load::ReplaceCopyObjectWithStoreLoad;
pub use replace_id_with_synonym::ReplaceIdWithSynonym;
pub use split_block::SplitBlock;
pub use swap_conditional_branch_operands::SwapConditionalBranchOperands;

use crate::transformation::Transformation;
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;

/// Serializable form of every transformation, used to record and replay
/// sequences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransformationMessage {
    AddConstantBoolean(AddConstantBoolean),
    AddDeadBlock(AddDeadBlock),
    AddDeadBreak(AddDeadBreak),
    AddDeadContinue(AddDeadContinue),
    AddLocalVariable(AddLocalVariable),
    AddSynonym(AddSynonym),
    AddTypeBoolean(AddTypeBoolean),
    EquationInstruction(EquationInstruction),
    InlineFunction(InlineFunction),
    MergeBlocks(MergeBlocks),
    MoveBlockDown(MoveBlockDown),
    MoveInstructionDown(MoveInstructionDown),
    PropagateInstructionDown(PropagateInstructionDown),
    PropagateInstructionIntoBlock(PropagateInstructionIntoBlock),
    PropagateInstructionUp(PropagateInstructionUp),
    ReplaceBranchFromDeadBlockWithExit(ReplaceBranchFromDeadBlockWithExit),
    ReplaceCopyObjectWithStoreLoad(ReplaceCopyObjectWithStoreLoad),
    ReplaceIdWithSynonym(ReplaceIdWithSynonym),
    SplitBlock(SplitBlock),
    SwapConditionalBranchOperands(SwapConditionalBranchOperands),
}

impl TransformationMessage {
    pub fn into_transformation(self) -> Box<dyn Transformation> {
        use TransformationMessage::*;
        match self {
            AddConstantBoolean(t) => Box::new(t),
            AddDeadBlock(t) => Box::new(t),
            AddDeadBreak(t) => Box::new(t),
            AddDeadContinue(t) => Box::new(t),
            AddLocalVariable(t) => Box::new(t),
            AddSynonym(t) => Box::new(t),
            AddTypeBoolean(t) => Box::new(t),
            EquationInstruction(t) => Box::new(t),
            InlineFunction(t) => Box::new(t),
            MergeBlocks(t) => Box::new(t),
            MoveBlockDown(t) => Box::new(t),
            MoveInstructionDown(t) => Box::new(t),
            PropagateInstructionDown(t) => Box::new(t),
            PropagateInstructionIntoBlock(t) => Box::new(t),
            PropagateInstructionUp(t) => Box::new(t),
            ReplaceBranchFromDeadBlockWithExit(t) => Box::new(t),
            ReplaceCopyObjectWithStoreLoad(t) => Box::new(t),
            ReplaceIdWithSynonym(t) => Box::new(t),
            SplitBlock(t) => Box::new(t),
            SwapConditionalBranchOperands(t) => Box::new(t),
        }
    }

    /// Parse a JSON array of messages
    pub fn sequence_from_json(json: &str) -> Result<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn sequence_to_json(messages: &[Self]) -> Result<String> {
        Ok(serde_json::to_string_pretty(messages)?)
    }
}
