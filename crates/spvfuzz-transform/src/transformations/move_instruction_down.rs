//! Swap an instruction with the one that follows it.

use crate::descriptor::InstructionDescriptor;
use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{memory, Instruction, IrContext, Opcode, OpcodeClass};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInstructionDown {
    pub instruction: InstructionDescriptor,
}

impl MoveInstructionDown {
    pub fn new(instruction: InstructionDescriptor) -> Self {
        Self { instruction }
    }
}

/// Opcodes that must stay in a fixed region of the block and therefore only
/// trade places with their own kind
fn is_positional(inst: &Instruction) -> bool {
    matches!(inst.opcode, Opcode::Phi | Opcode::Variable)
}

impl Transformation for MoveInstructionDown {
    fn name(&self) -> &'static str {
        "move_instruction_down"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        let Some(pos) = self.instruction.resolve(ir) else {
            return false;
        };
        let Some(block) = ir.module().block(pos.block) else {
            return false;
        };
        // The follower may be neither the terminator nor a merge instruction
        if pos.index + 2 >= block.len() {
            return false;
        }
        let first = &block.instructions[pos.index];
        let second = &block.instructions[pos.index + 1];
        if first.opcode.is_merge() || second.opcode.is_merge() {
            return false;
        }
        if first.is_terminator() || second.is_terminator() {
            return false;
        }
        if (is_positional(first) || is_positional(second)) && first.opcode != second.opcode {
            return false;
        }
        if first.opcode.class() == OpcodeClass::Unmodeled
            || second.opcode.class() == OpcodeClass::Unmodeled
        {
            return false;
        }
        if let Some(result) = first.result_id {
            if second.used_ids().any(|id| id == result) {
                return false;
            }
        }

        let a = memory::classify(ir, first);
        let b = memory::classify(ir, second);
        let legal = memory::can_swap(&a, &b, |location| ctx.pointee_is_irrelevant(location));
        if !legal {
            tracing::trace!(?a, ?b, "memory effects forbid the swap");
        }
        legal
    }

    fn apply(&self, ir: &mut IrContext, _ctx: &mut TransformationContext) -> Result<()> {
        let pos = self
            .instruction
            .resolve(ir)
            .ok_or_else(|| contract(format!("{:?} does not resolve", self.instruction)))?;
        let block = ir
            .module_mut()
            .block_mut(pos.block)
            .ok_or_else(|| missing("Block", pos.block))?;
        if pos.index + 1 >= block.len() {
            return Err(contract("no instruction to swap with"));
        }
        block.instructions.swap(pos.index, pos.index + 1);
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::MoveInstructionDown(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use spvfuzz_ir::Id;

    fn mover(base: Id, opcode: Opcode, skip: u32) -> MoveInstructionDown {
        MoveInstructionDown::new(InstructionDescriptor::new(base, opcode, skip))
    }

    #[test]
    fn test_adjacent_loads_swap() {
        let mut ir = IrContext::new(memory_module());
        let mut ctx = context_for(&ir);
        apply_and_validate(&mover(42, Opcode::Load, 0), &mut ir, &mut ctx);
        let entry = ir.module().block(ENTRY).unwrap();
        assert_eq!(entry.instructions[2].result_id, Some(43));
        assert_eq!(entry.instructions[3].result_id, Some(42));
    }

    #[test]
    fn test_variables_swap_with_each_other_only() {
        let mut ir = IrContext::new(memory_module());
        let mut ctx = context_for(&ir);
        assert!(!mover(41, Opcode::Variable, 0).is_applicable(&ir, &ctx));
        apply_and_validate(&mover(VAR, Opcode::Variable, 0), &mut ir, &mut ctx);
        assert_eq!(ir.module().block(ENTRY).unwrap().instructions[0].result_id, Some(41));
    }

    #[test]
    fn test_same_address_writes_need_irrelevant_pointee() {
        let ir = IrContext::new(memory_module());
        let mut ctx = context_for(&ir);
        let t = mover(43, Opcode::Store, 0);
        assert!(!t.is_applicable(&ir, &ctx));
        ctx.facts.add_irrelevant_pointee(VAR);
        assert!(t.is_applicable(&ir, &ctx));
    }

    #[test]
    fn test_read_of_written_location_never_swaps() {
        let ir = IrContext::new(memory_module());
        let mut ctx = context_for(&ir);
        let t = mover(43, Opcode::Load, 0);
        assert!(!t.is_applicable(&ir, &ctx));
        ctx.facts.add_irrelevant_pointee(VAR);
        assert!(!t.is_applicable(&ir, &ctx));
    }

    #[test]
    fn test_disjoint_writes_swap() {
        let mut ir = IrContext::new(memory_module());
        let mut ctx = context_for(&ir);
        apply_and_validate(&mover(43, Opcode::Store, 1), &mut ir, &mut ctx);
        let entry = ir.module().block(ENTRY).unwrap();
        assert_eq!(entry.instructions[5], Instruction::store(41, ONE));
    }

    #[test]
    fn test_rejections() {
        let ir = IrContext::new(memory_module());
        let ctx = context_for(&ir);
        // Store next to a barrier
        assert!(!mover(43, Opcode::Store, 2).is_applicable(&ir, &ctx));
        // The follower consumes the result
        assert!(!mover(44, Opcode::Load, 0).is_applicable(&ir, &ctx));
        // The follower is the terminator
        assert!(!mover(45, Opcode::IAdd, 0).is_applicable(&ir, &ctx));
        // Wrong opcode at the descriptor
        assert!(!mover(42, Opcode::Store, 5).is_applicable(&ir, &ctx));

        // Never past a merge instruction
        let ir = IrContext::new(diamond_module());
        assert!(!mover(42, Opcode::IAdd, 0).is_applicable(&ir, &ctx));
    }
}
