use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::contract;
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, Instruction, IrContext, Opcode};

/// Declare a boolean constant, optionally marking it irrelevant so later
/// transformations may use it without affecting semantics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddConstantBoolean {
    pub fresh_id: Id,
    pub is_true: bool,
    pub is_irrelevant: bool,
}

impl AddConstantBoolean {
    pub fn new(fresh_id: Id, is_true: bool, is_irrelevant: bool) -> Self {
        Self {
            fresh_id,
            is_true,
            is_irrelevant,
        }
    }
}

impl Transformation for AddConstantBoolean {
    fn name(&self) -> &'static str {
        "add_constant_boolean"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        ctx.is_fresh_id(ir, self.fresh_id) && ir.module().find_bool_type().is_some()
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let bool_type = ir
            .module()
            .find_bool_type()
            .ok_or_else(|| contract("module has no boolean type"))?;
        let opcode = if self.is_true {
            Opcode::ConstantTrue
        } else {
            Opcode::ConstantFalse
        };
        let module = ir.module_mut();
        module.add_type_or_value(
            Instruction::new(opcode)
                .with_result_type(bool_type)
                .with_result(self.fresh_id),
        );
        module.claim_id(self.fresh_id);
        if self.is_irrelevant {
            ctx.facts.add_irrelevant_id(self.fresh_id);
        }
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::AddConstantBoolean(self.clone())
    }
}
