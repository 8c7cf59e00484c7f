//! Sink an instruction into every successor of its block.
//!
//! Each successor receives a copy with its own fresh id. Uses dominated by a
//! successor read that successor's copy. Any remaining use must lie below
//! the merge block of the selection the block heads, where a phi with the
//! original result id selects among the copies.

use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{BasicBlock, FunctionAnalysis, Id, Instruction, IrContext, Module, Opcode};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagateInstructionDown {
    pub block: Id,
    /// `(successor, fresh id)` for the copy placed in each successor
    pub successor_id_map: Vec<(Id, Id)>,
}

#[derive(Debug, Clone)]
struct Plan {
    function: Id,
    index: usize,
    original: Instruction,
    /// `(successor, fresh id)`
    copies: Vec<(Id, Id)>,
    /// Block whose non-phi uses read the given copy
    block_rewrites: HashMap<Id, Id>,
    /// Phi parent whose incoming value becomes the given copy
    parent_rewrites: HashMap<Id, Id>,
    /// Merge block and incoming pairs of the phi that keeps the original id
    merge_phi: Option<(Id, Vec<(Id, Id)>)>,
}

/// Last pure, non-pointer instruction of `block` that nothing later in the
/// block uses
fn propagatable_index(module: &Module, block: &BasicBlock) -> Option<usize> {
    let end = block.insertion_point_before_terminator();
    (block.first_non_phi_index()..end).rev().find(|i| {
        let inst = &block.instructions[*i];
        let Some(result) = inst.result_id else {
            return false;
        };
        inst.opcode.is_pure()
            && inst.result_type.map_or(false, |t| !module.is_pointer_type(t))
            && !block.instructions[i + 1..]
                .iter()
                .any(|later| later.used_ids().any(|id| id == result))
    })
}

/// Copy of the first successor dominating `block`
fn dominating_copy(analysis: &FunctionAnalysis, copies: &[(Id, Id)], block: Id) -> Option<Id> {
    copies
        .iter()
        .find(|(successor, _)| analysis.dominators.dominates(*successor, block))
        .map(|(_, copy)| *copy)
}

impl PropagateInstructionDown {
    pub fn new(block: Id, successor_id_map: Vec<(Id, Id)>) -> Self {
        Self {
            block,
            successor_id_map,
        }
    }

    fn plan(&self, ir: &IrContext, ctx: &TransformationContext) -> Option<Plan> {
        let function = ir.function_of_block(self.block)?;
        let analysis = util::structured_analysis(ir, self.block)?;
        let structure = analysis.structure()?;
        let cfg = &analysis.cfg;
        if !cfg.is_reachable(self.block) {
            return None;
        }
        let successors = cfg.successors(self.block);
        if successors.is_empty() {
            return None;
        }
        for successor in successors {
            if *successor == self.block
                || cfg.predecessors(*successor) != [self.block]
                || structure.is_loop_header(*successor)
            {
                return None;
            }
        }

        let map: HashMap<Id, Id> = self.successor_id_map.iter().copied().collect();
        let expected: HashSet<Id> = successors.iter().copied().collect();
        if map.len() != self.successor_id_map.len()
            || map.keys().copied().collect::<HashSet<Id>>() != expected
        {
            return None;
        }
        let fresh: Vec<Id> = self.successor_id_map.iter().map(|(_, id)| *id).collect();
        if !ctx.are_fresh_and_distinct(ir, &fresh) {
            return None;
        }
        let copies: Vec<(Id, Id)> = successors
            .iter()
            .filter_map(|s| map.get(s).map(|copy| (*s, *copy)))
            .collect();

        let block = ir.module().block(self.block)?;
        let index = propagatable_index(ir.module(), block)?;
        let original = block.instructions[index].clone();
        let result = original.result_id?;

        let merge = structure
            .construct(self.block)
            .filter(|c| !c.is_loop())
            .map(|c| c.merge);
        let below_merge = |b: Id| merge.map_or(false, |m| analysis.dominators.dominates(m, b));

        let mut block_rewrites = HashMap::new();
        let mut parent_rewrites = HashMap::new();
        let mut needs_phi = false;
        for site in ir.uses(result) {
            let inst = ir.instruction_at(site.user)?;
            let user_block = ir.block_of(site.user)?;
            if !cfg.is_reachable(user_block) {
                return None;
            }
            if inst.opcode == Opcode::Phi {
                for (value, parent) in inst.phi_incoming() {
                    if value != result {
                        continue;
                    }
                    if let Some(copy) = dominating_copy(&analysis, &copies, parent) {
                        parent_rewrites.insert(parent, copy);
                    } else if below_merge(parent) {
                        needs_phi = true;
                    } else {
                        return None;
                    }
                }
            } else if let Some(copy) = dominating_copy(&analysis, &copies, user_block) {
                block_rewrites.insert(user_block, copy);
            } else if below_merge(user_block) {
                needs_phi = true;
            } else {
                return None;
            }
        }

        let merge_phi = if needs_phi {
            let merge = merge?;
            let mut incoming = Vec::new();
            for pred in cfg.predecessors(merge) {
                incoming.push((dominating_copy(&analysis, &copies, *pred)?, *pred));
            }
            Some((merge, incoming))
        } else {
            None
        };

        Some(Plan {
            function,
            index,
            original,
            copies,
            block_rewrites,
            parent_rewrites,
            merge_phi,
        })
    }

    fn rewrite(&self, module: &mut Module, plan: &Plan) -> Result<()> {
        let (Some(ty), Some(result)) = (plan.original.result_type, plan.original.result_id) else {
            return Err(contract("propagated instruction has no result"));
        };
        let func = module
            .function_mut(plan.function)
            .ok_or_else(|| missing("Function", plan.function))?;

        for block in &mut func.blocks {
            let block_copy = plan.block_rewrites.get(&block.id).copied();
            for inst in &mut block.instructions {
                if inst.opcode == Opcode::Phi {
                    for (parent, copy) in &plan.parent_rewrites {
                        if inst.phi_value_for(*parent) == Some(result) {
                            inst.remove_phi_incoming(*parent);
                            inst.add_phi_incoming(*copy, *parent);
                        }
                    }
                } else if let Some(copy) = block_copy {
                    inst.replace_id_operands(result, copy);
                }
            }
        }

        func.block_mut(self.block)
            .ok_or_else(|| missing("Block", self.block))?
            .instructions
            .remove(plan.index);
        for (successor, copy) in &plan.copies {
            let target = func
                .block_mut(*successor)
                .ok_or_else(|| missing("Block", *successor))?;
            let mut inst = plan.original.clone();
            inst.result_id = Some(*copy);
            let at = target.first_non_phi_index();
            target.instructions.insert(at, inst);
        }
        if let Some((merge, incoming)) = &plan.merge_phi {
            let target = func.block_mut(*merge).ok_or_else(|| missing("Block", *merge))?;
            let at = target.first_non_phi_index();
            target.instructions.insert(at, Instruction::phi(ty, result, incoming));
        }

        let fresh: Vec<Id> = plan.copies.iter().map(|(_, copy)| *copy).collect();
        util::claim_ids(module, &fresh);
        Ok(())
    }
}

impl Transformation for PropagateInstructionDown {
    fn name(&self) -> &'static str {
        "propagate_instruction_down"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        let Some(plan) = self.plan(ir, ctx) else {
            return false;
        };
        util::trial_is_valid(ir, plan.function, |m| self.rewrite(m, &plan))
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let plan = self
            .plan(ir, ctx)
            .ok_or_else(|| contract(format!("nothing to propagate down from block {}", self.block)))?;
        self.rewrite(ir.module_mut(), &plan)?;
        if plan.original.result_id.map_or(false, |id| ctx.facts.is_id_irrelevant(id)) {
            for (_, copy) in &plan.copies {
                ctx.facts.add_irrelevant_id(*copy);
            }
        }
        Ok(())
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::PropagateInstructionDown(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn test_sink_into_both_arms() {
        let mut ir = IrContext::new(diamond_module());
        let mut ctx = context_for(&ir);
        let t = PropagateInstructionDown::new(ENTRY, vec![(LEFT, 100), (RIGHT, 101)]);
        apply_and_validate(&t, &mut ir, &mut ctx);

        let m = ir.module();
        assert!(m.block(ENTRY).unwrap().position_of(42).is_none());
        assert_eq!(
            m.block(LEFT).unwrap().instructions[..2],
            [
                Instruction::op(Opcode::IAdd, INT, 100, &[41, ONE]),
                Instruction::op(Opcode::ISub, INT, 43, &[100, ONE]),
            ]
        );
        assert_eq!(m.block(RIGHT).unwrap().instructions[1], Instruction::op(Opcode::IMul, INT, 44, &[101, TWO]));
        // No use below the merge, so no phi
        assert_eq!(m.block(MERGE).unwrap().phis().count(), 1);
    }

    #[test]
    fn test_use_below_merge_gets_phi() {
        let mut m = diamond_module();
        let merge = m.block_mut(MERGE).unwrap();
        merge.instructions.insert(1, Instruction::op(Opcode::IAdd, INT, 46, &[42, 45]));
        merge.instructions[2] = Instruction::store(VAR, 46);
        m.claim_id(46);
        let mut ir = IrContext::new(m);
        let mut ctx = context_for(&ir);

        let t = PropagateInstructionDown::new(ENTRY, vec![(LEFT, 100), (RIGHT, 101)]);
        apply_and_validate(&t, &mut ir, &mut ctx);
        let merge = ir.module().block(MERGE).unwrap();
        let phi = &merge.instructions[1];
        assert_eq!(phi.result_id, Some(42));
        assert_eq!(phi.phi_value_for(LEFT), Some(100));
        assert_eq!(phi.phi_value_for(RIGHT), Some(101));
    }

    #[test]
    fn test_sink_along_single_edge() {
        let mut ir = IrContext::new(loop_module());
        let mut ctx = context_for(&ir);
        let t = PropagateInstructionDown::new(BODY, vec![(BODY2, 100)]);
        apply_and_validate(&t, &mut ir, &mut ctx);
        let cont = ir.module().block(CONTINUE).unwrap();
        assert_eq!(cont.instructions[0], Instruction::op(Opcode::IAdd, INT, 45, &[100, ONE]));
    }

    #[test]
    fn test_pointer_result_stays_in_place() {
        let mut m = diamond_module();
        let entry = m.block_mut(ENTRY).unwrap();
        entry.instructions.insert(4, Instruction::copy_object(PTR_INT, 46, VAR));
        let merge = m.block_mut(MERGE).unwrap();
        merge.instructions[1] = Instruction::store(46, 45);
        m.claim_id(46);
        let mut ir = IrContext::new(m);
        let mut ctx = context_for(&ir);
        // Sinking the pointer copy would need a pointer-typed phi at the
        // merge, so the integer add before it is chosen instead
        let t = PropagateInstructionDown::new(ENTRY, vec![(LEFT, 100), (RIGHT, 101)]);
        apply_and_validate(&t, &mut ir, &mut ctx);
        let m = ir.module();
        assert!(m.block(ENTRY).unwrap().position_of(46).is_some());
        assert!(m.block(ENTRY).unwrap().position_of(42).is_none());
        assert_eq!(m.block(LEFT).unwrap().instructions[0], Instruction::op(Opcode::IAdd, INT, 100, &[41, ONE]));
        assert_eq!(m.block(MERGE).unwrap().phis().count(), 1);
    }

    #[test]
    fn test_rejections() {
        let ir = IrContext::new(chain_module());
        let ctx = context_for(&ir);
        // The successor's phi reads the value along the edge
        assert!(!PropagateInstructionDown::new(ENTRY, vec![(31, 100)]).is_applicable(&ir, &ctx));

        let ir = IrContext::new(loop_module());
        let ctx = context_for(&ir);
        // Successor is a loop header
        assert!(!PropagateInstructionDown::new(CONTINUE, vec![(HEADER, 100)]).is_applicable(&ir, &ctx));
        // No candidate instruction
        assert!(!PropagateInstructionDown::new(HEADER, vec![(BODY, 100), (LOOP_MERGE, 101)]).is_applicable(&ir, &ctx));
        // Map does not match the successors
        assert!(!PropagateInstructionDown::new(BODY, vec![]).is_applicable(&ir, &ctx));
        assert!(!PropagateInstructionDown::new(BODY, vec![(BODY2, 100), (CONTINUE, 101)]).is_applicable(&ir, &ctx));
    }
}
