//! Route a copied value through memory: the `CopyObject` becomes a store to a
//! new variable followed by a load into the same result id.

use crate::facts::DataDescriptor;
use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, Instruction, IrContext, Opcode, StorageClass};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceCopyObjectWithStoreLoad {
    pub copy_object_result_id: Id,
    pub fresh_variable_id: Id,
    /// `Function` or `Private`
    pub variable_storage_class: StorageClass,
    pub variable_initializer_id: Id,
}

/// What the rewrite needs to know about the copy
struct Copied {
    function: Id,
    block: Id,
    value_type: Id,
    source: Id,
    pointer_type: Id,
}

impl ReplaceCopyObjectWithStoreLoad {
    pub fn new(
        copy_object_result_id: Id,
        fresh_variable_id: Id,
        variable_storage_class: StorageClass,
        variable_initializer_id: Id,
    ) -> Self {
        Self {
            copy_object_result_id,
            fresh_variable_id,
            variable_storage_class,
            variable_initializer_id,
        }
    }

    fn copied(&self, ir: &IrContext) -> Option<Copied> {
        let module = ir.module();
        let inst = ir.get_def(self.copy_object_result_id)?;
        if inst.opcode != Opcode::CopyObject {
            return None;
        }
        let (function, block) = ir.enclosing_block(self.copy_object_result_id)?;
        let value_type = inst.result_type?;
        // Pointers cannot be stored
        if module.pointer_type_info(value_type).is_some() {
            return None;
        }
        let pointer_type = module.find_pointer_type(self.variable_storage_class, value_type)?;
        Some(Copied {
            function,
            block,
            value_type,
            source: inst.id_operand(0)?,
            pointer_type,
        })
    }
}

impl Transformation for ReplaceCopyObjectWithStoreLoad {
    fn name(&self) -> &'static str {
        "replace_copy_object_with_store_load"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        if !matches!(self.variable_storage_class, StorageClass::Function | StorageClass::Private) {
            return false;
        }
        if !ctx.is_fresh_id(ir, self.fresh_variable_id) {
            return false;
        }
        let Some(copied) = self.copied(ir) else {
            return false;
        };
        ir.module()
            .type_or_value(self.variable_initializer_id)
            .map_or(false, |init| {
                init.opcode.is_constant() && init.result_type == Some(copied.value_type)
            })
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let copied = self
            .copied(ir)
            .ok_or_else(|| contract(format!("{} is not a copy of a storable value", self.copy_object_result_id)))?;
        let variable = Instruction::variable(
            copied.pointer_type,
            self.fresh_variable_id,
            self.variable_storage_class,
            Some(self.variable_initializer_id),
        );

        let module = ir.module_mut();
        if self.variable_storage_class == StorageClass::Function {
            let entry = module
                .function_mut(copied.function)
                .and_then(|f| f.entry_mut())
                .ok_or_else(|| missing("Function", copied.function))?;
            let at = entry.first_body_index();
            entry.instructions.insert(at, variable);
        } else {
            module.add_global(variable);
        }

        let block = module
            .block_mut(copied.block)
            .ok_or_else(|| missing("Block", copied.block))?;
        let index = block
            .position_of(self.copy_object_result_id)
            .ok_or_else(|| missing("Instruction", self.copy_object_result_id))?;
        block.instructions[index] = Instruction::store(self.fresh_variable_id, copied.source);
        block.instructions.insert(
            index + 1,
            Instruction::load(copied.value_type, self.copy_object_result_id, self.fresh_variable_id),
        );
        module.claim_id(self.fresh_variable_id);

        ctx.facts.add_synonym(
            DataDescriptor::id(copied.source),
            DataDescriptor::id(self.copy_object_result_id),
        );
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::ReplaceCopyObjectWithStoreLoad(self.clone())
    }
}
