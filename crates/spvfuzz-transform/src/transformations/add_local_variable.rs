use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, Instruction, IrContext, StorageClass};

/// Declare a new function-local variable in the entry block of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLocalVariable {
    pub fresh_id: Id,
    /// Pointer type with `Function` storage
    pub type_id: Id,
    pub function_id: Id,
    /// Constant of the pointee type
    pub initializer_id: Option<Id>,
    pub value_is_irrelevant: bool,
}

impl AddLocalVariable {
    pub fn new(
        fresh_id: Id,
        type_id: Id,
        function_id: Id,
        initializer_id: Option<Id>,
        value_is_irrelevant: bool,
    ) -> Self {
        Self {
            fresh_id,
            type_id,
            function_id,
            initializer_id,
            value_is_irrelevant,
        }
    }
}

impl Transformation for AddLocalVariable {
    fn name(&self) -> &'static str {
        "add_local_variable"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        let module = ir.module();
        if !ctx.is_fresh_id(ir, self.fresh_id) {
            return false;
        }
        let Some((StorageClass::Function, pointee)) = module.pointer_type_info(self.type_id) else {
            return false;
        };
        if let Some(init) = self.initializer_id {
            let is_constant = module
                .type_or_value(init)
                .map_or(false, |inst| inst.opcode.is_constant() && inst.result_type == Some(pointee));
            if !is_constant {
                return false;
            }
        }
        module
            .function(self.function_id)
            .map_or(false, |f| f.entry().is_some())
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let module = ir.module_mut();
        let entry = module
            .function_mut(self.function_id)
            .and_then(|f| f.entry_mut())
            .ok_or_else(|| missing("Function", self.function_id))?;
        if entry.terminator().is_none() {
            return Err(contract(format!("entry block {} has no terminator", entry.id)));
        }
        let at = entry.first_body_index();
        entry.instructions.insert(
            at,
            Instruction::variable(self.type_id, self.fresh_id, StorageClass::Function, self.initializer_id),
        );
        module.claim_id(self.fresh_id);
        if self.value_is_irrelevant {
            ctx.facts.add_irrelevant_pointee(self.fresh_id);
        }
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::AddLocalVariable(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use spvfuzz_ir::Opcode;

    #[test]
    fn test_variable_joins_entry_prefix() {
        let mut ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        let t = AddLocalVariable::new(100, PTR_INT, MAIN, Some(TWO), true);
        apply_and_validate(&t, &mut ir, &mut ctx);

        let entry = ir.module().block(ENTRY).unwrap();
        assert_eq!(entry.instructions[0].result_id, Some(VAR));
        assert_eq!(
            entry.instructions[1],
            Instruction::variable(PTR_INT, 100, StorageClass::Function, Some(TWO))
        );
        assert_eq!(entry.instructions[2].opcode, Opcode::Store);
        assert!(ctx.facts.pointee_value_is_irrelevant(100));
    }

    #[test]
    fn test_uninitialized() {
        let mut ir = IrContext::new(chain_module());
        let mut ctx = context_for(&ir);
        apply_and_validate(&AddLocalVariable::new(100, PTR_INT, MAIN, None, false), &mut ir, &mut ctx);
        assert!(!ctx.facts.pointee_value_is_irrelevant(100));
    }

    #[test]
    fn test_rejections() {
        let ir = IrContext::new(diamond_module());
        let ctx = context_for(&ir);
        // Private storage
        assert!(!AddLocalVariable::new(100, PTR_PRIVATE_INT, MAIN, None, false).is_applicable(&ir, &ctx));
        // Not a pointer type
        assert!(!AddLocalVariable::new(100, INT, MAIN, None, false).is_applicable(&ir, &ctx));
        // Initializer of the wrong type, or not a constant
        assert!(!AddLocalVariable::new(100, PTR_INT, MAIN, Some(TRUE), false).is_applicable(&ir, &ctx));
        assert!(!AddLocalVariable::new(100, PTR_INT, MAIN, Some(42), false).is_applicable(&ir, &ctx));
        // Unknown function
        assert!(!AddLocalVariable::new(100, PTR_INT, 99, None, false).is_applicable(&ir, &ctx));
        // Id in use
        assert!(!AddLocalVariable::new(VAR, PTR_INT, MAIN, None, false).is_applicable(&ir, &ctx));
    }
}
