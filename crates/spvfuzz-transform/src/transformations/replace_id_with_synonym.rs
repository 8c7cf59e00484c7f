use crate::descriptor::IdUseDescriptor;
use crate::facts::DataDescriptor;
use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, Instruction, IrContext, Opcode, Operand};

/// Replace one use of an id with a known synonym
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceIdWithSynonym {
    pub id_use: IdUseDescriptor,
    pub synonymous_id: Id,
}

/// Operand slots that must keep naming the exact id they hold
fn slot_is_fixed(inst: &Instruction, operand: usize) -> bool {
    match inst.opcode {
        // Initializers must stay constants
        Opcode::Variable => true,
        // Indices into structures must stay constants
        Opcode::AccessChain | Opcode::InBoundsAccessChain => operand > 0,
        Opcode::FunctionCall => operand == 0,
        Opcode::Phi => operand % 2 == 1,
        // Only the selector is a value
        Opcode::BranchConditional | Opcode::Switch => operand > 0,
        Opcode::ReturnValue => false,
        _ => inst.opcode.is_merge() || inst.opcode.is_terminator(),
    }
}

impl ReplaceIdWithSynonym {
    pub fn new(id_use: IdUseDescriptor, synonymous_id: Id) -> Self {
        Self {
            id_use,
            synonymous_id,
        }
    }

    fn operand_index(&self) -> Option<usize> {
        usize::try_from(self.id_use.in_operand_index).ok()
    }
}

impl Transformation for ReplaceIdWithSynonym {
    fn name(&self) -> &'static str {
        "replace_id_with_synonym"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        let original = self.id_use.id_of_interest;
        if original == self.synonymous_id || !util::is_value(ir, self.synonymous_id) {
            return false;
        }
        if !ctx.facts.are_synonymous(&DataDescriptor::id(original), &DataDescriptor::id(self.synonymous_id)) {
            return false;
        }
        if ir.type_of(original) != ir.type_of(self.synonymous_id) {
            return false;
        }
        let (Some(pos), Some(operand)) = (self.id_use.resolve(ir), self.operand_index()) else {
            return false;
        };
        let Some(inst) = ir.module().block(pos.block).and_then(|b| b.instructions.get(pos.index)) else {
            return false;
        };
        if slot_is_fixed(inst, operand) {
            return false;
        }
        if inst.opcode == Opcode::Phi {
            // The value must reach the end of the incoming block
            return inst
                .id_operand(operand + 1)
                .map_or(false, |parent| ir.is_available_at_end(self.synonymous_id, parent));
        }
        ir.is_available_before(self.synonymous_id, pos.block, pos.index)
    }

    fn apply(&self, ir: &mut IrContext, _ctx: &mut TransformationContext) -> Result<()> {
        let pos = self
            .id_use
            .resolve(ir)
            .ok_or_else(|| contract(format!("{:?} does not resolve", self.id_use)))?;
        let operand = self
            .operand_index()
            .ok_or_else(|| contract("operand index out of range"))?;
        let inst = ir
            .module_mut()
            .block_mut(pos.block)
            .and_then(|b| b.instructions.get_mut(pos.index))
            .ok_or_else(|| missing("Block", pos.block))?;
        let slot = inst
            .operands
            .get_mut(operand)
            .ok_or_else(|| contract("operand index out of range"))?;
        *slot = Operand::Id(self.synonymous_id);
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::ReplaceIdWithSynonym(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::InstructionDescriptor;
    use crate::test_util::*;
    use crate::transformations::AddSynonym;

    fn use_of(id: Id, base: Id, opcode: Opcode, operand: u32) -> IdUseDescriptor {
        IdUseDescriptor::new(id, InstructionDescriptor::new(base, opcode, 0), operand)
    }

    #[test]
    fn test_replace_with_copy() {
        let mut ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        let copy = AddSynonym::new(42, 100, InstructionDescriptor::new(43, Opcode::ISub, 0));
        apply_and_validate(&copy, &mut ir, &mut ctx);

        let t = ReplaceIdWithSynonym::new(use_of(42, 43, Opcode::ISub, 0), 100);
        apply_and_validate(&t, &mut ir, &mut ctx);
        let left = ir.module().block(LEFT).unwrap();
        assert_eq!(left.instructions[1], Instruction::op(Opcode::ISub, INT, 43, &[100, ONE]));

        // The copy does not reach the other arm
        let t = ReplaceIdWithSynonym::new(use_of(42, 44, Opcode::IMul, 0), 100);
        assert!(!t.is_applicable(&ir, &ctx));
    }

    #[test]
    fn test_replace_phi_value() {
        let mut ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        let copy = AddSynonym::new(43, 100, InstructionDescriptor::new(LEFT, Opcode::Branch, 0));
        apply_and_validate(&copy, &mut ir, &mut ctx);

        let t = ReplaceIdWithSynonym::new(use_of(43, 45, Opcode::Phi, 0), 100);
        apply_and_validate(&t, &mut ir, &mut ctx);
        let phi = &ir.module().block(MERGE).unwrap().instructions[0];
        assert_eq!(phi.phi_value_for(LEFT), Some(100));
    }

    #[test]
    fn test_fixed_slots() {
        let ir = IrContext::new(call_module());
        let mut ctx = context_for(&ir);
        ctx.facts.add_synonym(DataDescriptor::id(ONE), DataDescriptor::id(TWO));

        // Stored value may change
        let stored = ReplaceIdWithSynonym::new(use_of(ONE, VAR, Opcode::Store, 1), TWO);
        assert!(stored.is_applicable(&ir, &ctx));
        // Variable initializer may not
        let init = ReplaceIdWithSynonym::new(use_of(ONE, 61, Opcode::Variable, 1), TWO);
        assert!(!init.is_applicable(&ir, &ctx));
        // Nor the callee of a call
        ctx.facts.add_synonym(DataDescriptor::id(CALLEE), DataDescriptor::id(MAIN));
        let callee = ReplaceIdWithSynonym::new(use_of(CALLEE, 41, Opcode::FunctionCall, 0), MAIN);
        assert!(!callee.is_applicable(&ir, &ctx));
    }

    #[test]
    fn test_requires_synonym_fact() {
        let ir = IrContext::new(diamond_module());
        let ctx = context_for(&ir);
        let t = ReplaceIdWithSynonym::new(use_of(ONE, VAR, Opcode::Store, 1), TWO);
        assert!(!t.is_applicable(&ir, &ctx));
        // Descriptor names the wrong id for the slot
        let t = ReplaceIdWithSynonym::new(use_of(TWO, VAR, Opcode::Store, 1), ONE);
        assert!(!t.is_applicable(&ir, &ctx));
    }
}
