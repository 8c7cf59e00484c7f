//! Replace a function call with a renamed copy of the callee's body.
//!
//! The call block is split at the call. The part before the call branches to
//! the inlined entry block, the inlined return block copies the returned
//! value into the call's result id and branches to a new successor block,
//! which receives everything that followed the call. Callee variables are
//! hoisted into the caller's entry block without initializers; the
//! initializers become stores at the start of the inlined entry block.

use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use crate::util::{self, contract, missing};
use serde::{Deserialize, Serialize};
use spvfuzz_core::Result;
use spvfuzz_ir::{validation, BasicBlock, Function, Id, Instruction, IrContext, Opcode, Operand};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineFunction {
    /// Result id of the call to inline
    pub function_call_id: Id,
    /// `(callee id, fresh id)` pairs. Callee-local ids without an entry are
    /// renamed with ids from the overflow pool.
    pub result_id_map: Vec<(Id, Id)>,
    /// Label of the block that receives the code after the call; drawn from
    /// the overflow pool when absent
    pub successor_block_id: Option<Id>,
}

/// Resolved call instruction
#[derive(Debug, Clone)]
struct CallSite {
    caller: Id,
    block: Id,
    index: usize,
    callee: Id,
    result_type: Id,
    args: Vec<Id>,
}

/// Ids defined inside the callee's body, in layout order
fn callee_locals(callee: &Function) -> Vec<Id> {
    callee
        .blocks
        .iter()
        .flat_map(|b| std::iter::once(b.id).chain(b.instructions.iter().filter_map(|i| i.result_id)))
        .collect()
}

fn rename(inst: &Instruction, map: &HashMap<Id, Id>) -> Instruction {
    let mut inst = inst.clone();
    if let Some(result) = inst.result_id {
        inst.result_id = Some(map.get(&result).copied().unwrap_or(result));
    }
    for operand in &mut inst.operands {
        if let Operand::Id(id) = operand {
            if let Some(new) = map.get(id) {
                *id = *new;
            }
        }
    }
    inst
}

impl InlineFunction {
    pub fn new(function_call_id: Id, result_id_map: Vec<(Id, Id)>, successor_block_id: Option<Id>) -> Self {
        Self {
            function_call_id,
            result_id_map,
            successor_block_id,
        }
    }

    fn call_site(&self, ir: &IrContext) -> Option<CallSite> {
        let call = ir.get_def(self.function_call_id)?;
        if call.opcode != Opcode::FunctionCall {
            return None;
        }
        let (caller, block) = ir.enclosing_block(self.function_call_id)?;
        let index = ir.module().block(block)?.position_of(self.function_call_id)?;
        Some(CallSite {
            caller,
            block,
            index,
            callee: call.id_operand(0)?,
            result_type: call.result_type?,
            args: call.id_operands().skip(1).collect(),
        })
    }

    /// Whether the callee's body can be spliced in: a single return in the
    /// last block and no other way out of the function
    fn callee_is_inlinable(callee: &Function) -> bool {
        let returns = callee
            .blocks
            .iter()
            .filter(|b| {
                b.terminator()
                    .map_or(false, |t| matches!(t.opcode, Opcode::Return | Opcode::ReturnValue))
            })
            .count();
        let last_returns = callee.blocks.last().and_then(|b| b.terminator()).map_or(false, |t| {
            matches!(t.opcode, Opcode::Return | Opcode::ReturnValue)
        });
        let other_exits = callee.blocks.iter().any(|b| {
            b.terminator().map_or(true, |t| {
                matches!(
                    t.opcode,
                    Opcode::Kill | Opcode::TerminateInvocation | Opcode::Unreachable
                )
            })
        });
        returns == 1 && last_returns && !other_exits && !callee.calls(callee.id())
    }

    fn rewrite(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        let site = self
            .call_site(ir)
            .ok_or_else(|| contract(format!("{} is not a function call", self.function_call_id)))?;
        let callee = ir
            .module()
            .function(site.callee)
            .cloned()
            .ok_or_else(|| missing("Function", site.callee))?;

        let given: HashMap<Id, Id> = self.result_id_map.iter().copied().collect();
        let mut map = HashMap::new();
        let mut fresh = Vec::new();
        for local in callee_locals(&callee) {
            let new = match given.get(&local) {
                Some(id) => *id,
                None => ctx.ids.next_overflow_id()?,
            };
            map.insert(local, new);
            fresh.push((local, new));
        }
        let successor = match self.successor_block_id {
            Some(id) => id,
            None => ctx.ids.next_overflow_id()?,
        };
        for (param, arg) in callee.params.iter().filter_map(|p| p.result_id).zip(&site.args) {
            map.insert(param, *arg);
        }

        let mut inlined: Vec<BasicBlock> = callee
            .blocks
            .iter()
            .map(|b| {
                BasicBlock::with_instructions(
                    map.get(&b.id).copied().unwrap_or(b.id),
                    b.instructions.iter().map(|i| rename(i, &map)).collect(),
                )
            })
            .collect();

        let entry = inlined
            .first_mut()
            .ok_or_else(|| contract(format!("function {} has no blocks", site.callee)))?;
        let inlined_entry = entry.id;
        let variables_end = entry.first_body_index();
        let mut hoisted: Vec<Instruction> = entry.instructions.drain(..variables_end).collect();
        let mut stores = Vec::new();
        for variable in &mut hoisted {
            if variable.operands.len() > 1 {
                let initializer = variable.operands.pop().and_then(|op| op.as_id());
                if let (Some(pointer), Some(value)) = (variable.result_id, initializer) {
                    stores.push(Instruction::store(pointer, value));
                }
            }
        }
        entry.instructions.splice(0..0, stores);

        let exit = inlined
            .last_mut()
            .ok_or_else(|| contract(format!("function {} has no blocks", site.callee)))?;
        let ret = exit
            .instructions
            .pop()
            .ok_or_else(|| contract("inlined return block is empty"))?;
        match ret.opcode {
            Opcode::ReturnValue => {
                let value = ret
                    .id_operand(0)
                    .ok_or_else(|| contract("return without a value"))?;
                exit.instructions.push(Instruction::copy_object(
                    site.result_type,
                    self.function_call_id,
                    value,
                ));
            }
            Opcode::Return => {}
            other => return Err(contract(format!("callee ends in {:?}", other))),
        }
        exit.instructions.push(Instruction::branch(successor));

        let module = ir.module_mut();
        let func = module
            .function_mut(site.caller)
            .ok_or_else(|| missing("Function", site.caller))?;
        let block_index = func
            .block_index(site.block)
            .ok_or_else(|| missing("Block", site.block))?;
        let call_block = &mut func.blocks[block_index];
        let after_call = call_block.instructions.split_off(site.index + 1);
        call_block.instructions.pop();
        call_block.instructions.push(Instruction::branch(inlined_entry));

        let old_successors = after_call.last().map(Instruction::branch_targets).unwrap_or_default();
        for target in old_successors {
            if let Some(b) = func.block_mut(target) {
                for phi in b.phis_mut() {
                    phi.replace_phi_parent(site.block, successor);
                }
            }
        }
        let tail = BasicBlock::with_instructions(successor, after_call);
        let at = block_index + 1;
        func.blocks
            .splice(at..at, inlined.into_iter().chain(std::iter::once(tail)));

        let entry = func
            .entry_mut()
            .ok_or_else(|| missing("Entry block of function", site.caller))?;
        let at = entry.first_body_index();
        entry.instructions.splice(at..at, hoisted);

        let mut new_ids: Vec<Id> = fresh.iter().map(|(_, new)| *new).collect();
        new_ids.push(successor);
        util::claim_ids(module, &new_ids);

        for (old, new) in fresh {
            if ctx.facts.is_block_dead(old) {
                ctx.facts.add_dead_block(new);
            }
            if ctx.facts.is_id_irrelevant(old) {
                ctx.facts.add_irrelevant_id(new);
            }
            if ctx.facts.pointee_value_is_irrelevant(old) {
                ctx.facts.add_irrelevant_pointee(new);
            }
        }
        tracing::debug!(call = self.function_call_id, callee = site.callee, "inlined call");
        Ok(())
    }
}

impl Transformation for InlineFunction {
    fn name(&self) -> &'static str {
        "inline_function"
    }

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool {
        let Some(site) = self.call_site(ir) else {
            return false;
        };
        if site.callee == site.caller {
            return false;
        }
        let Some(callee) = ir.module().function(site.callee) else {
            return false;
        };
        if !Self::callee_is_inlinable(callee) || callee.params.len() != site.args.len() {
            return false;
        }
        let Some(analysis) = util::structured_analysis(ir, site.block) else {
            return false;
        };
        if analysis.structure().map_or(true, |s| s.is_loop_header(site.block)) {
            return false;
        }

        let locals: HashSet<Id> = callee_locals(callee).into_iter().collect();
        let mut keys = HashSet::new();
        for (key, _) in &self.result_id_map {
            if !locals.contains(key) || !keys.insert(*key) {
                return false;
            }
        }
        let mut values: Vec<Id> = self.result_id_map.iter().map(|(_, v)| *v).collect();
        values.extend(self.successor_block_id);
        if !ctx.are_fresh_and_distinct(ir, &values) {
            return false;
        }
        let needed = locals.len() - keys.len() + usize::from(self.successor_block_id.is_none());
        if needed > ctx.ids.overflow_available() {
            return false;
        }

        let mut trial_ir = ir.clone();
        let mut trial_ctx = ctx.clone();
        if self.rewrite(&mut trial_ir, &mut trial_ctx).is_err() {
            return false;
        }
        match validation::validate_function(&trial_ir, site.caller) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!(error = %e, "inlined caller is invalid");
                false
            }
        }
    }

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()> {
        self.rewrite(ir, ctx)
    }

    fn to_message(&self) -> TransformationMessage {
        TransformationMessage::InlineFunction(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use spvfuzz_ir::StorageClass;

    fn full_map() -> Vec<(Id, Id)> {
        vec![
            (60, 100),
            (61, 101),
            (62, 102),
            (63, 103),
            (65, 105),
            (66, 106),
            (67, 107),
            (68, 108),
        ]
    }

    #[test]
    fn test_inline_with_explicit_ids() {
        let mut ir = IrContext::new(call_module());
        let mut ctx = context_for(&ir);
        let t = InlineFunction::new(41, full_map(), Some(110));
        apply_and_validate(&t, &mut ir, &mut ctx);

        let main = ir.module().function(MAIN).unwrap();
        let layout: Vec<Id> = main.blocks.iter().map(|b| b.id).collect();
        assert_eq!(layout, vec![ENTRY, 100, 105, 106, 110, 31]);

        let entry = &main.blocks[0];
        assert_eq!(entry.instructions[1], Instruction::variable(PTR_INT, 101, StorageClass::Function, None));
        assert_eq!(entry.terminator(), Some(&Instruction::branch(100)));

        let inlined_entry = main.block(100).unwrap();
        assert_eq!(inlined_entry.instructions[0], Instruction::store(101, ONE));
        assert_eq!(inlined_entry.instructions[2], Instruction::op(Opcode::IAdd, INT, 103, &[102, TWO]));

        let exit = main.block(106).unwrap();
        assert_eq!(exit.instructions[1], Instruction::copy_object(INT, 41, 108));
        assert_eq!(exit.terminator(), Some(&Instruction::branch(110)));

        let tail = main.block(110).unwrap();
        assert_eq!(tail.instructions, vec![Instruction::store(VAR, 41), Instruction::branch(31)]);
        assert!(!main.calls(CALLEE));
    }

    #[test]
    fn test_inline_with_overflow_ids() {
        let mut ir = IrContext::new(call_module());
        let mut ctx = context_for(&ir);
        ctx.ids.reserve_overflow(16).unwrap();
        ctx.facts.add_dead_block(65);
        let t = InlineFunction::new(41, vec![(65, 200)], None);
        apply_and_validate(&t, &mut ir, &mut ctx);

        assert!(ctx.facts.is_block_dead(200));
        assert_eq!(ctx.ids.overflow_available(), 16 - 8);
        assert!(ir.module().id_bound > 200);
    }

    #[test]
    fn test_rejections() {
        let ir = IrContext::new(call_module());
        let mut ctx = context_for(&ir);
        // Missing ids and an empty pool
        assert!(!InlineFunction::new(41, vec![], None).is_applicable(&ir, &ctx));
        // Not a call
        assert!(!InlineFunction::new(42, full_map(), Some(110)).is_applicable(&ir, &ctx));
        // Fresh id already in use
        assert!(!InlineFunction::new(41, full_map(), Some(VAR)).is_applicable(&ir, &ctx));
        // Key is not an id of the callee
        let mut map = full_map();
        map.push((VAR, 111));
        assert!(!InlineFunction::new(41, map, Some(110)).is_applicable(&ir, &ctx));
        // Duplicate fresh ids
        let mut map = full_map();
        map[0].1 = 101;
        assert!(!InlineFunction::new(41, map, Some(110)).is_applicable(&ir, &ctx));
        // Fresh id sitting in the overflow pool
        ctx.ids.reserve_overflow(1).unwrap();
        let pooled = ir.module().id_bound;
        assert!(!InlineFunction::new(41, full_map(), Some(pooled)).is_applicable(&ir, &ctx));
    }

    #[test]
    fn test_rejects_callee_with_kill() {
        let mut m = call_module();
        let callee = m.function_mut(CALLEE).unwrap();
        callee.block_mut(65).unwrap().instructions[1] = Instruction::kill();
        let ir = IrContext::new(m);
        let ctx = context_for(&ir);
        assert!(!InlineFunction::new(41, full_map(), Some(110)).is_applicable(&ir, &ctx));
    }
}
