use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{Id, Instruction, IrContext, Module, Opcode};

/// Make a dead block leave the function instead of branching on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceBranchFromDeadBlockWithExit {
    pub block: Id,
    /// `Return`, `ReturnValue`, `Kill` or `Unreachable`
    pub opcode: Opcode,
    /// Returned value, for `ReturnValue` only
    pub return_value_id: Option<Id>,
}

impl ReplaceBranchFromDeadBlockWithExit {
    pub fn new(block: Id, opcode: Opcode, return_value_id: Option<Id>) -> Self {
        Self {
            block,
            opcode,
            return_value_id,
        }
    }

    fn exit(&self) -> Option<Instruction> {
        match (self.opcode, self.return_value_id) {
            (Opcode::Return, None) => Some(Instruction::return_void()),
            (Opcode::ReturnValue, Some(value)) => Some(Instruction::return_value(value)),
            (Opcode::Kill, None) => Some(Instruction::kill()),
            (Opcode::Unreachable, None) => Some(Instruction::unreachable()),
            _ => None,
        }
    }

    fn rewrite(&self, module: &mut Module) -> Result<()> {
        let exit = self
            .exit()
            .ok_or_else(|| contract(format!("{:?} is not a function exit", self.opcode)))?;
        let block = module.block_mut(self.block).ok_or_else(|| missing("Block", self.block))?;
        let successor = util::unconditional_target(block)
            .ok_or_else(|| contract(format!("block {} does not end in a branch", self.block)))?;
        if let Some(terminator) = block.terminator_mut() {
            *terminator = exit;
        }
        let target = module.block_mut(successor).ok_or_else(|| missing("Block", successor))?;
        for phi in target.phis_mut() {
            phi.remove_phi_incoming(self.block);
        }
        Ok(())
    }
}

impl Transformation for ReplaceBranchFromDeadBlockWithExit {
    fn name(&self) -> &'static str {
        "replace_branch_from_dead_block_with_exit"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        if !ctx.facts.is_block_dead(self.block) || self.exit().is_none() {
            return false;
        }
        let module = ir.module();
        let Some(function) = ir.function_of_block(self.block).and_then(|f| module.function(f)) else {
            return false;
        };
        let Some(analysis) = util::structured_analysis(ir, self.block) else {
            return false;
        };
        let Some(structure) = analysis.structure() else {
            return false;
        };
        let Some(block) = module.block(self.block) else {
            return false;
        };
        let Some(successor) = util::unconditional_target(block) else {
            return false;
        };
        if block.is_header() || structure.is_in_continue_construct(self.block) {
            return false;
        }
        // The successor must stay reachable
        if !analysis
            .cfg
            .predecessors(successor)
            .iter()
            .any(|p| *p != self.block)
        {
            return false;
        }

        let returns_void = module
            .type_or_value(function.return_type())
            .map_or(false, |t| t.opcode == Opcode::TypeVoid);
        match (self.opcode, self.return_value_id) {
            (Opcode::Return, _) if !returns_void => return false,
            (Opcode::ReturnValue, Some(value)) => {
                if ir.type_of(value) != Some(function.return_type())
                    || !ir.is_available_at_end(value, self.block)
                {
                    return false;
                }
            }
            _ => {}
        }
        util::trial_is_valid(ir, function.id(), |m| self.rewrite(m))
    }

    fn apply(&self, ir: &mut IrContext, _ctx: &mut TransformationContext) -> Result<()> {
        self.rewrite(ir.module_mut())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::ReplaceBranchFromDeadBlockWithExit(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn test_return_from_dead_arm() {
        let mut ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        ctx.facts.add_dead_block(LEFT);
        let t = ReplaceBranchFromDeadBlockWithExit::new(LEFT, Opcode::Return, None);
        apply_and_validate(&t, &mut ir, &mut ctx);

        assert_eq!(ir.module().block(LEFT).unwrap().terminator(), Some(&Instruction::return_void()));
        let phi = &ir.module().block(MERGE).unwrap().instructions[0];
        assert_eq!(phi.phi_incoming(), vec![(44, RIGHT)]);
    }

    #[test]
    fn test_return_value_from_callee() {
        let mut ir = IrContext::new(call_module());
        let mut ctx = context_for(&ir);
        ctx.facts.add_dead_block(65);
        // Return is not allowed in a function with a result
        assert!(!ReplaceBranchFromDeadBlockWithExit::new(65, Opcode::Return, None).is_applicable(&ir, &ctx));
        // Nor a value of the wrong type
        assert!(!ReplaceBranchFromDeadBlockWithExit::new(65, Opcode::ReturnValue, Some(TRUE)).is_applicable(&ir, &ctx));

        let t = ReplaceBranchFromDeadBlockWithExit::new(65, Opcode::ReturnValue, Some(67));
        apply_and_validate(&t, &mut ir, &mut ctx);
        assert_eq!(ir.module().block(65).unwrap().terminator(), Some(&Instruction::return_value(67)));
        let phi = &ir.module().block(66).unwrap().instructions[0];
        assert_eq!(phi.phi_incoming(), vec![(63, 60)]);
    }

    #[test]
    fn test_kill_and_unreachable() {
        for opcode in [Opcode::Kill, Opcode::Unreachable] {
            let mut ir = IrContext::new(diamond_module());
            let mut ctx = context_for(&ir);
            ctx.facts.add_dead_block(RIGHT);
            let t = ReplaceBranchFromDeadBlockWithExit::new(RIGHT, opcode, None);
            apply_and_validate(&t, &mut ir, &mut ctx);
            assert_eq!(ir.module().block(RIGHT).unwrap().terminator().map(|t| t.opcode), Some(opcode));
        }
    }

    #[test]
    fn test_rejections() {
        let ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        // Not known to be dead
        assert!(!ReplaceBranchFromDeadBlockWithExit::new(LEFT, Opcode::Return, None).is_applicable(&ir, &ctx));
        ctx.facts.add_dead_block(LEFT);
        // Not an exit, or a stray value
        assert!(!ReplaceBranchFromDeadBlockWithExit::new(LEFT, Opcode::Branch, None).is_applicable(&ir, &ctx));
        assert!(!ReplaceBranchFromDeadBlockWithExit::new(LEFT, Opcode::Return, Some(42)).is_applicable(&ir, &ctx));

        // The successor would lose its only predecessor
        let ir = IrContext::new(chain_module());
        let mut ctx = context_for(&ir);
        ctx.facts.add_dead_block(31);
        assert!(!ReplaceBranchFromDeadBlockWithExit::new(31, Opcode::Return, None).is_applicable(&ir, &ctx));

        // Inside a continue construct
        let ir = IrContext::new(loop_module());
        let mut ctx = context_for(&ir);
        ctx.facts.add_dead_block(CONTINUE);
        assert!(!ReplaceBranchFromDeadBlockWithExit::new(CONTINUE, Opcode::Return, None).is_applicable(&ir, &ctx));
    }
}
