use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::contract;
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, Instruction, IrContext, Opcode};

/// Declare the boolean type when the module lacks one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTypeBoolean {
    pub fresh_id: Id,
}

impl AddTypeBoolean {
    pub fn new(fresh_id: Id) -> Self {
        Self { fresh_id }
    }
}

impl Transformation for AddTypeBoolean {
    fn name(&self) -> &'static str {
        "add_type_boolean"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        ctx.is_fresh_id(ir, self.fresh_id) && ir.module().find_bool_type().is_none()
    }

    fn apply(&self, ir: &mut IrContext, _ctx: &mut TransformationContext) -> Result<()> {
        if ir.module().find_bool_type().is_some() {
            return Err(contract("module already declares a boolean type"));
        }
        let module = ir.module_mut();
        module.add_type_or_value(Instruction::new(Opcode::TypeBool).with_result(self.fresh_id));
        module.claim_id(self.fresh_id);
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::AddTypeBoolean(self.clone())
    }
}
