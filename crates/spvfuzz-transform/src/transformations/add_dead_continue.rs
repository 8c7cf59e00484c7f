//! Turn an unconditional branch inside a loop into a conditional one whose
//! never-taken arm jumps to the loop's continue target.

use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util;
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, IrContext, Module};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDeadContinue {
    pub from_block: Id,
    /// The original successor is taken when the condition has this value
    pub continue_condition_value: bool,
    /// One value per phi of the continue target
    pub phi_ids: Vec<Id>,
}

impl AddDeadContinue {
    pub fn new(from_block: Id, continue_condition_value: bool, phi_ids: Vec<Id>) -> Self {
        Self {
            from_block,
            continue_condition_value,
            phi_ids,
        }
    }

    /// The continue target the new edge would reach
    fn continue_target(&self, ir: &IrContext) -> Option<Id> {
        let analysis = util::structured_analysis(ir, self.from_block)?;
        let structure = analysis.structure()?;
        let header = structure.innermost_loop(self.from_block)?;
        let target = structure.continue_target(header)?;
        // A continue straight to the header would be a second back edge
        (target != header).then_some(target)
    }

    fn rewrite(&self, module: &mut Module, target: Id) -> Result<()> {
        util::add_dead_edge(
            module,
            self.from_block,
            target,
            self.continue_condition_value,
            &self.phi_ids,
        )
    }
}

impl Transformation for AddDeadContinue {
    fn name(&self) -> &'static str {
        "add_dead_continue"
    }

    fn is_applicable(&self, ir: &IrContext, _ctx: &TransformationContext) -> bool {
        if ir.module().find_bool_constant(self.continue_condition_value).is_none() {
            return false;
        }
        let Some(function) = ir.function_of_block(self.from_block) else {
            return false;
        };
        let Some(target) = self.continue_target(ir) else {
            return false;
        };
        let Some(analysis) = util::structured_analysis(ir, self.from_block) else {
            return false;
        };
        let Some(structure) = analysis.structure() else {
            return false;
        };
        if !analysis.cfg.is_reachable(self.from_block) || structure.exit_in_continue(self.from_block) {
            return false;
        }
        let Some(successor) = ir.module().block(self.from_block).and_then(util::unconditional_target) else {
            return false;
        };
        if successor == target {
            return false;
        }
        if !util::phi_values_fit(ir, target, self.from_block, &self.phi_ids) {
            return false;
        }
        util::trial_is_valid(ir, function, |m| self.rewrite(m, target))
    }

    fn apply(&self, ir: &mut IrContext, _ctx: &mut TransformationContext) -> Result<()> {
        let target = self
            .continue_target(ir)
            .ok_or_else(|| util::contract(format!("block {} is not inside a loop", self.from_block)))?;
        self.rewrite(ir.module_mut(), target)
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::AddDeadContinue(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use spvfuzz_ir::{Instruction, Opcode};

    #[test]
    fn test_continue_from_loop_body() {
        let mut ir = IrContext::new(loop_module());
        let mut ctx = context_for(&ir);
        let t = AddDeadContinue::new(BODY, true, vec![]);
        apply_and_validate(&t, &mut ir, &mut ctx);
        let terminator = ir.module().block(BODY).unwrap().terminator().unwrap().clone();
        assert_eq!(terminator, Instruction::branch_conditional(TRUE, BODY2, CONTINUE));
    }

    #[test]
    fn test_rejections() {
        let ir = IrContext::new(loop_module());
        let ctx = context_for(&ir);
        // Already branches to the continue target
        assert!(!AddDeadContinue::new(BODY2, true, vec![]).is_applicable(&ir, &ctx));
        // Inside the continue construct
        assert!(!AddDeadContinue::new(CONTINUE, true, vec![]).is_applicable(&ir, &ctx));
        // Not inside a loop
        assert!(!AddDeadContinue::new(ENTRY, true, vec![]).is_applicable(&ir, &ctx));
        assert!(!AddDeadContinue::new(LOOP_MERGE, true, vec![]).is_applicable(&ir, &ctx));
        // Phi count mismatch
        assert!(!AddDeadContinue::new(BODY, true, vec![ONE]).is_applicable(&ir, &ctx));
    }

    #[test]
    fn test_rejects_when_continue_needs_skipped_value() {
        // The continue target uses a value defined in BODY2, which a
        // continue from BODY would skip
        let mut m = loop_module();
        m.block_mut(BODY2)
            .unwrap()
            .instructions
            .insert(0, Instruction::op(Opcode::IAdd, INT, 47, &[42, ONE]));
        m.block_mut(CONTINUE).unwrap().instructions[0] = Instruction::op(Opcode::IAdd, INT, 45, &[47, ONE]);
        m.claim_id(47);
        let ir = IrContext::new(m);
        assert_valid(&ir);
        let ctx = context_for(&ir);
        assert!(!AddDeadContinue::new(BODY, true, vec![]).is_applicable(&ir, &ctx));
    }
}
