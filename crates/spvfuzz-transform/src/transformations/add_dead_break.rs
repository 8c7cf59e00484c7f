//! Turn an unconditional branch into a conditional one whose never-taken
//! arm breaks out to a merge block.

use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util;
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, IrContext, Module};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDeadBreak {
    /// Block whose unconditional branch becomes conditional
    pub from_block: Id,
    /// Merge block the dead arm jumps to
    pub to_block: Id,
    /// Value of the condition; the original successor is taken when the
    /// condition has this value
    pub break_condition_value: bool,
    /// One value per phi of `to_block`, flowing in along the new edge
    pub phi_ids: Vec<Id>,
}

impl AddDeadBreak {
    pub fn new(from_block: Id, to_block: Id, break_condition_value: bool, phi_ids: Vec<Id>) -> Self {
        Self {
            from_block,
            to_block,
            break_condition_value,
            phi_ids,
        }
    }

    fn rewrite(&self, module: &mut Module) -> Result<()> {
        util::add_dead_edge(
            module,
            self.from_block,
            self.to_block,
            self.break_condition_value,
            &self.phi_ids,
        )
    }
}

impl Transformation for AddDeadBreak {
    fn name(&self) -> &'static str {
        "add_dead_break"
    }

    fn is_applicable(&self, ir: &IrContext, _ctx: &TransformationContext) -> bool {
        let module = ir.module();
        if module.find_bool_constant(self.break_condition_value).is_none() {
            return false;
        }
        let Some(function) = ir.function_of_block(self.from_block) else {
            return false;
        };
        if ir.function_of_block(self.to_block) != Some(function) {
            return false;
        }
        let Some(analysis) = util::structured_analysis(ir, self.from_block) else {
            return false;
        };
        let Some(structure) = analysis.structure() else {
            return false;
        };
        if !analysis.cfg.is_reachable(self.from_block) || structure.exit_in_continue(self.from_block) {
            return false;
        }
        let Some(successor) = module.block(self.from_block).and_then(util::unconditional_target) else {
            return false;
        };
        if successor == self.to_block {
            return false;
        }

        let merge_of = |header: Option<Id>| header.and_then(|h| structure.merge_block(h));
        let is_break_target = merge_of(structure.exit_construct(self.from_block)) == Some(self.to_block)
            || merge_of(structure.innermost_loop(self.from_block)) == Some(self.to_block)
            || merge_of(structure.innermost_switch(self.from_block)) == Some(self.to_block);
        if !is_break_target {
            return false;
        }

        if !util::phi_values_fit(ir, self.to_block, self.from_block, &self.phi_ids) {
            return false;
        }

        // The new edge can change dominance; check the edited function
        util::trial_is_valid(ir, function, |m| self.rewrite(m))
    }

    fn apply(&self, ir: &mut IrContext, _ctx: &mut TransformationContext) -> Result<()> {
        self.rewrite(ir.module_mut())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::AddDeadBreak(self.clone())
    }
}
