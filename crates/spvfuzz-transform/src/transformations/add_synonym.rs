use crate::descriptor::InstructionDescriptor;
use crate::facts::DataDescriptor;
use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, Instruction, IrContext};

/// Copy a value with `CopyObject` and record the copy as its synonym
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSynonym {
    pub result_id: Id,
    pub fresh_id: Id,
    pub instruction_to_insert_before: InstructionDescriptor,
}

impl AddSynonym {
    pub fn new(result_id: Id, fresh_id: Id, instruction_to_insert_before: InstructionDescriptor) -> Self {
        Self {
            result_id,
            fresh_id,
            instruction_to_insert_before,
        }
    }
}

impl Transformation for AddSynonym {
    fn name(&self) -> &'static str {
        "add_synonym"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        if !ctx.is_fresh_id(ir, self.fresh_id)
            || !util::is_value(ir, self.result_id)
            || ctx.facts.is_id_irrelevant(self.result_id)
        {
            return false;
        }
        let Some(pos) = self.instruction_to_insert_before.resolve(ir) else {
            return false;
        };
        util::can_insert_before(ir, pos.block, pos.index)
            && ir.is_available_before(self.result_id, pos.block, pos.index)
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let pos = self
            .instruction_to_insert_before
            .resolve(ir)
            .ok_or_else(|| contract(format!("{:?} does not resolve", self.instruction_to_insert_before)))?;
        let ty = ir
            .type_of(self.result_id)
            .ok_or_else(|| missing("Value", self.result_id))?;
        let module = ir.module_mut();
        module
            .block_mut(pos.block)
            .ok_or_else(|| missing("Block", pos.block))?
            .instructions
            .insert(pos.index, Instruction::copy_object(ty, self.fresh_id, self.result_id));
        module.claim_id(self.fresh_id);
        ctx.facts
            .add_synonym(DataDescriptor::id(self.result_id), DataDescriptor::id(self.fresh_id));
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::AddSynonym(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use spvfuzz_ir::Opcode;

    #[test]
    fn test_copy_in_later_block() {
        let mut ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        let t = AddSynonym::new(42, 100, InstructionDescriptor::new(45, Opcode::Store, 0));
        apply_and_validate(&t, &mut ir, &mut ctx);
        let merge = ir.module().block(MERGE).unwrap();
        assert_eq!(merge.instructions[1], Instruction::copy_object(INT, 100, 42));
        assert!(ctx.facts.are_synonymous(&DataDescriptor::id(42), &DataDescriptor::id(100)));
    }

    #[test]
    fn test_copy_of_constant() {
        let mut ir = IrContext::new(chain_module());
        let mut ctx = context_for(&ir);
        let t = AddSynonym::new(TWO, 100, InstructionDescriptor::new(41, Opcode::IAdd, 0));
        apply_and_validate(&t, &mut ir, &mut ctx);
        assert_eq!(ctx.facts.id_synonyms_of(TWO), vec![100]);
    }

    #[test]
    fn test_rejections() {
        let ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        // Used before its definition
        assert!(!AddSynonym::new(42, 100, InstructionDescriptor::new(41, Opcode::Load, 0)).is_applicable(&ir, &ctx));
        // Not a value
        assert!(!AddSynonym::new(INT, 100, InstructionDescriptor::new(LEFT, Opcode::Branch, 0)).is_applicable(&ir, &ctx));
        // Fresh id in use
        assert!(!AddSynonym::new(42, 43, InstructionDescriptor::new(LEFT, Opcode::Branch, 0)).is_applicable(&ir, &ctx));

        ctx.facts.add_irrelevant_id(42);
        assert!(!AddSynonym::new(42, 100, InstructionDescriptor::new(LEFT, Opcode::Branch, 0)).is_applicable(&ir, &ctx));
    }
}
