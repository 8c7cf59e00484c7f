//! Insert an arithmetic or logical instruction and record the equation it
//! satisfies, so the ledger can derive synonyms from it.

use crate::descriptor::InstructionDescriptor;
use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, Instruction, IrContext, Opcode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquationInstruction {
    pub fresh_id: Id,
    pub opcode: Opcode,
    pub in_operand_ids: Vec<Id>,
    pub instruction_to_insert_before: InstructionDescriptor,
}

impl EquationInstruction {
    pub fn new(
        fresh_id: Id,
        opcode: Opcode,
        in_operand_ids: Vec<Id>,
        instruction_to_insert_before: InstructionDescriptor,
    ) -> Self {
        Self {
            fresh_id,
            opcode,
            in_operand_ids,
            instruction_to_insert_before,
        }
    }

    /// Result type of the equation, if the operands suit the opcode
    fn result_type(&self, ir: &IrContext) -> Option<Id> {
        let module = ir.module();
        let types: Vec<Id> = self
            .in_operand_ids
            .iter()
            .map(|id| ir.type_of(*id))
            .collect::<Option<_>>()?;
        let is_int = |ty: Id| {
            module
                .type_or_value(ty)
                .map_or(false, |inst| inst.opcode == Opcode::TypeInt)
        };
        match (self.opcode, types.as_slice()) {
            (Opcode::IAdd | Opcode::ISub, [a, b]) if a == b && is_int(*a) => Some(*a),
            (Opcode::SNegate, [a]) if is_int(*a) => Some(*a),
            (Opcode::LogicalNot, [a]) if module.is_bool_type(*a) => Some(*a),
            (Opcode::CopyObject, [a]) => Some(*a),
            _ => None,
        }
    }

    fn instruction(&self, ty: Id) -> Instruction {
        Instruction::op(self.opcode, ty, self.fresh_id, &self.in_operand_ids)
    }
}

impl Transformation for EquationInstruction {
    fn name(&self) -> &'static str {
        "equation_instruction"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        if !ctx.is_fresh_id(ir, self.fresh_id) {
            return false;
        }
        let Some(pos) = self.instruction_to_insert_before.resolve(ir) else {
            return false;
        };
        if !util::can_insert_before(ir, pos.block, pos.index) {
            return false;
        }
        // Irrelevant values carry no meaning to reason about
        let operands_ok = self.in_operand_ids.iter().all(|id| {
            util::is_value(ir, *id)
                && !ctx.facts.is_id_irrelevant(*id)
                && ir.is_available_before(*id, pos.block, pos.index)
        });
        operands_ok && self.result_type(ir).is_some()
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let pos = self
            .instruction_to_insert_before
            .resolve(ir)
            .ok_or_else(|| contract(format!("{:?} does not resolve", self.instruction_to_insert_before)))?;
        let ty = self
            .result_type(ir)
            .ok_or_else(|| contract(format!("operands {:?} do not suit {:?}", self.in_operand_ids, self.opcode)))?;
        let module = ir.module_mut();
        module
            .block_mut(pos.block)
            .ok_or_else(|| missing("Block", pos.block))?
            .instructions
            .insert(pos.index, self.instruction(ty));
        module.claim_id(self.fresh_id);
        ctx.facts
            .add_id_equation(self.fresh_id, self.opcode, self.in_operand_ids.clone());
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::EquationInstruction(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::DataDescriptor;
    use crate::test_util::*;

    fn before_left_branch(fresh_id: Id, opcode: Opcode, operands: Vec<Id>) -> EquationInstruction {
        EquationInstruction::new(
            fresh_id,
            opcode,
            operands,
            InstructionDescriptor::new(LEFT, Opcode::Branch, 0),
        )
    }

    #[test]
    fn test_double_negation_is_synonymous() {
        let mut ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        apply_and_validate(&before_left_branch(100, Opcode::SNegate, vec![42]), &mut ir, &mut ctx);
        apply_and_validate(&before_left_branch(101, Opcode::SNegate, vec![100]), &mut ir, &mut ctx);
        assert!(ctx.facts.are_synonymous(&DataDescriptor::id(101), &DataDescriptor::id(42)));
        assert!(!ctx.facts.are_synonymous(&DataDescriptor::id(100), &DataDescriptor::id(42)));

        let left = ir.module().block(LEFT).unwrap();
        assert_eq!(left.instructions[1], Instruction::op(Opcode::SNegate, INT, 100, &[42]));
    }

    #[test]
    fn test_add_undoes_sub() {
        let mut ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        apply_and_validate(&before_left_branch(100, Opcode::ISub, vec![42, ONE]), &mut ir, &mut ctx);
        apply_and_validate(&before_left_branch(101, Opcode::IAdd, vec![100, ONE]), &mut ir, &mut ctx);
        assert!(ctx.facts.are_synonymous(&DataDescriptor::id(101), &DataDescriptor::id(42)));
    }

    #[test]
    fn test_logical_not_and_copy() {
        let mut ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        apply_and_validate(&before_left_branch(100, Opcode::LogicalNot, vec![TRUE]), &mut ir, &mut ctx);
        apply_and_validate(&before_left_branch(101, Opcode::CopyObject, vec![43]), &mut ir, &mut ctx);
        assert!(ctx.facts.are_synonymous(&DataDescriptor::id(101), &DataDescriptor::id(43)));
    }

    #[test]
    fn test_rejections() {
        let ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        // Mixed operand types
        assert!(!before_left_branch(100, Opcode::IAdd, vec![42, TRUE]).is_applicable(&ir, &ctx));
        // Operand count
        assert!(!before_left_branch(100, Opcode::SNegate, vec![42, ONE]).is_applicable(&ir, &ctx));
        // Opcode outside the supported set
        assert!(!before_left_branch(100, Opcode::IMul, vec![42, ONE]).is_applicable(&ir, &ctx));
        // Boolean negation of an integer
        assert!(!before_left_branch(100, Opcode::LogicalNot, vec![42]).is_applicable(&ir, &ctx));
        // Defined in the other arm
        assert!(!before_left_branch(100, Opcode::SNegate, vec![44]).is_applicable(&ir, &ctx));
        // Type id is not a value
        assert!(!before_left_branch(100, Opcode::CopyObject, vec![INT]).is_applicable(&ir, &ctx));

        ctx.facts.add_irrelevant_id(42);
        assert!(!before_left_branch(100, Opcode::SNegate, vec![42]).is_applicable(&ir, &ctx));
    }
}
