//! Stable names for instruction positions and operand uses.
//!
//! Instructions without a result id cannot be named directly. A descriptor
//! names one relative to a base: the nearest preceding instruction that has
//! a result id, or the block label. Starting at the base, the descriptor
//! skips `num_opcodes_to_ignore` instructions with the target opcode and
//! picks the next one.

use serde::{Deserialize, Serialize};
use spvfuzz_ir::{Id, Instruction, IrContext, Module, Opcode, Operand};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstructionDescriptor {
    pub base_instruction_result_id: Id,
    pub target_instruction_opcode: Opcode,
    pub num_opcodes_to_ignore: u32,
}

/// Resolved position of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstructionPosition {
    pub function: Id,
    pub block: Id,
    pub index: usize,
}

impl InstructionDescriptor {
    pub fn new(base: Id, opcode: Opcode, num_opcodes_to_ignore: u32) -> Self {
        Self {
            base_instruction_result_id: base,
            target_instruction_opcode: opcode,
            num_opcodes_to_ignore,
        }
    }

    /// Descriptor for the instruction at `index` in `block`
    pub fn for_position(module: &Module, block: Id, index: usize) -> Option<Self> {
        let block = module.block(block)?;
        let target = block.instructions.get(index)?;
        if let Some(id) = target.result_id {
            return Some(Self::new(id, target.opcode, 0));
        }
        let base_index = block.instructions[..index]
            .iter()
            .rposition(|inst| inst.result_id.is_some());
        let (base, start) = match base_index {
            Some(i) => (block.instructions[i].result_id?, i),
            None => (block.id, 0),
        };
        let skipped = block.instructions[start..index]
            .iter()
            .filter(|inst| inst.opcode == target.opcode)
            .count();
        Some(Self::new(base, target.opcode, u32::try_from(skipped).ok()?))
    }

    pub fn resolve(&self, ir: &IrContext) -> Option<InstructionPosition> {
        let module = ir.module();
        let (function, block, start) = if ir.is_label(self.base_instruction_result_id) {
            let (function, block) = ir.enclosing_block(self.base_instruction_result_id)?;
            (function, block, 0)
        } else {
            let (function, block) = ir.enclosing_block(self.base_instruction_result_id)?;
            let start = module
                .block(block)?
                .position_of(self.base_instruction_result_id)?;
            (function, block, start)
        };
        let instructions = &module.block(block)?.instructions;
        let mut skipped = 0;
        for (index, inst) in instructions.iter().enumerate().skip(start) {
            if inst.opcode != self.target_instruction_opcode {
                continue;
            }
            if skipped == self.num_opcodes_to_ignore {
                return Some(InstructionPosition {
                    function,
                    block,
                    index,
                });
            }
            skipped += 1;
        }
        None
    }

    pub fn resolve_instruction<'a>(&self, ir: &'a IrContext) -> Option<&'a Instruction> {
        let pos = self.resolve(ir)?;
        ir.module().block(pos.block)?.instructions.get(pos.index)
    }
}

/// One use of an id: the instruction using it and the operand slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdUseDescriptor {
    pub id_of_interest: Id,
    pub enclosing_instruction: InstructionDescriptor,
    pub in_operand_index: u32,
}

impl IdUseDescriptor {
    pub fn new(id: Id, enclosing_instruction: InstructionDescriptor, in_operand_index: u32) -> Self {
        Self {
            id_of_interest: id,
            enclosing_instruction,
            in_operand_index,
        }
    }

    /// Position of the using instruction, if the operand really holds the id
    pub fn resolve(&self, ir: &IrContext) -> Option<InstructionPosition> {
        let pos = self.enclosing_instruction.resolve(ir)?;
        let inst = ir.module().block(pos.block)?.instructions.get(pos.index)?;
        let operand = inst.operands.get(usize::try_from(self.in_operand_index).ok()?)?;
        (*operand == Operand::Id(self.id_of_interest)).then_some(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;

    #[test]
    fn test_resolve_relative_to_label() {
        let ir = IrContext::new(test_util::diamond_module());
        let desc = InstructionDescriptor::new(test_util::LEFT, Opcode::Branch, 0);
        let pos = desc.resolve(&ir).unwrap();
        assert_eq!(pos.block, test_util::LEFT);
        assert_eq!(ir.module().block(pos.block).unwrap().instructions[pos.index].opcode, Opcode::Branch);
    }

    #[test]
    fn test_resolve_relative_to_result() {
        let ir = IrContext::new(test_util::diamond_module());
        // Second store after the variable in the entry block
        let desc = InstructionDescriptor::new(test_util::VAR, Opcode::Store, 1);
        assert!(desc.resolve(&ir).is_none());
        let desc = InstructionDescriptor::new(test_util::VAR, Opcode::Store, 0);
        assert!(desc.resolve(&ir).is_some());
    }

    #[test]
    fn test_for_position_round_trips() {
        let module = test_util::diamond_module();
        let ir = IrContext::new(module.clone());
        for function in &module.functions {
            for block in &function.blocks {
                for index in 0..block.len() {
                    let desc = InstructionDescriptor::for_position(&module, block.id, index).unwrap();
                    let pos = desc.resolve(&ir).unwrap();
                    assert_eq!((pos.block, pos.index), (block.id, index));
                }
            }
        }
    }

    #[test]
    fn test_id_use_descriptor() {
        let ir = IrContext::new(test_util::diamond_module());
        let store = InstructionDescriptor::new(test_util::VAR, Opcode::Store, 0);
        assert!(IdUseDescriptor::new(test_util::VAR, store.clone(), 0).resolve(&ir).is_some());
        assert!(IdUseDescriptor::new(test_util::VAR, store.clone(), 1).resolve(&ir).is_none());
        assert!(IdUseDescriptor::new(test_util::VAR, store, 7).resolve(&ir).is_none());
    }
}
