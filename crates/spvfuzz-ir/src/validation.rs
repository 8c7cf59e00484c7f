//! Structural validation for modules.
//!
//! This approximates the external validator for the rules the
//! transformation engine must preserve: id uniqueness, block shape, phi and
//! predecessor agreement, dominance of definitions over uses, structured
//! control flow, and the simple typing rules of the modeled opcodes.

use crate::context::{DefSite, IrContext};
use crate::instruction::{Id, Instruction, Opcode, StorageClass};
use crate::module::{BasicBlock, Function, Module};
use spvfuzz_core::{Error, Result};

fn invalid(message: impl Into<String>) -> Error {
    Error::Validation(message.into())
}

/// Validate that a module is well-formed
pub fn validate_module(module: &Module) -> Result<()> {
    validate_context(&IrContext::new(module.clone()))
}

/// Validate the module owned by a context, reusing its cached analyses
pub fn validate_context(ctx: &IrContext) -> Result<()> {
    let module = ctx.module();
    let index = ctx.def_use();

    if let Some(id) = index.duplicates().first() {
        return Err(invalid(format!("Id {} is defined more than once", id)));
    }
    if let Some(id) = index
        .defined_ids()
        .find(|id| *id == 0 || *id >= module.id_bound)
    {
        return Err(invalid(format!(
            "Id {} is outside the id bound {}",
            id, module.id_bound
        )));
    }

    validate_declarations(ctx)?;

    for function in &module.functions {
        validate_function(ctx, function.id())?;
    }

    Ok(())
}

fn validate_declarations(ctx: &IrContext) -> Result<()> {
    let module = ctx.module();

    for (i, inst) in module.types_and_values.iter().enumerate() {
        for id in inst.used_ids() {
            match ctx.def_site(id) {
                Some(DefSite::TypeOrValue(j)) if j < i => {}
                _ => {
                    return Err(invalid(format!(
                        "Declaration {:?} uses {} before it is declared",
                        inst.result_id, id
                    )))
                }
            }
        }
        if inst.opcode.is_constant() && !inst.result_type.map_or(false, |t| is_type(ctx, t)) {
            return Err(invalid(format!(
                "Constant {:?} does not have a type",
                inst.result_id
            )));
        }
    }

    for inst in &module.globals {
        if inst.opcode != Opcode::Variable {
            continue;
        }
        let storage = inst.literal_operand(0).and_then(StorageClass::from_literal);
        let pointer = inst.result_type.and_then(|t| module.pointer_type_info(t));
        match (storage, pointer) {
            (Some(StorageClass::Function), _) => {
                return Err(invalid(format!(
                    "Global variable {:?} has Function storage",
                    inst.result_id
                )))
            }
            (Some(s), Some((ps, _))) if s == ps => {}
            _ => {
                return Err(invalid(format!(
                    "Global variable {:?} has a mismatched pointer type",
                    inst.result_id
                )))
            }
        }
    }

    Ok(())
}

fn is_type(ctx: &IrContext, id: Id) -> bool {
    ctx.module()
        .type_or_value(id)
        .map_or(false, |inst| inst.opcode.is_type())
}

/// Validate a single function of the module owned by `ctx`
pub fn validate_function(ctx: &IrContext, function_id: Id) -> Result<()> {
    let module = ctx.module();
    let function = module
        .function(function_id)
        .ok_or_else(|| Error::NotFound(format!("Function {}", function_id)))?;

    if function.blocks.is_empty() {
        return Err(invalid(format!("Function {} has no basic blocks", function_id)));
    }
    if !is_type(ctx, function.return_type()) {
        return Err(invalid(format!(
            "Function {} has an undeclared return type",
            function_id
        )));
    }
    for param in &function.params {
        if !param.result_type.map_or(false, |t| is_type(ctx, t)) {
            return Err(invalid(format!(
                "Parameter {:?} of function {} has no type",
                param.result_id, function_id
            )));
        }
    }

    for (bi, block) in function.blocks.iter().enumerate() {
        validate_block_shape(block, bi == 0)?;
    }

    let analysis = ctx
        .analysis(function_id)
        .ok_or_else(|| Error::NotFound(format!("Function {}", function_id)))?;
    let cfg = &analysis.cfg;
    let dom = &analysis.dominators;

    for block in &function.blocks {
        for target in block.successors() {
            if !cfg.contains(target) {
                return Err(invalid(format!(
                    "Block {} branches to {}, which is not a block of function {}",
                    block.id, target, function_id
                )));
            }
        }
    }

    if let Some(entry) = cfg.entry() {
        if !cfg.predecessors(entry).is_empty() {
            return Err(invalid(format!("Entry block {} has predecessors", entry)));
        }
    }

    for (bi, block) in function.blocks.iter().enumerate() {
        if let Some(idom) = dom.immediate_dominator(block.id) {
            if function.block_index(idom).map_or(true, |di| di >= bi) {
                return Err(invalid(format!(
                    "Block {} appears before its dominator {}",
                    block.id, idom
                )));
            }
        }
    }

    for block in &function.blocks {
        validate_phis(ctx, block, cfg.predecessors(block.id))?;
    }

    for block in &function.blocks {
        for (ii, inst) in block.instructions.iter().enumerate() {
            validate_operands(ctx, function, block, ii, inst, cfg.is_reachable(block.id))?;
            validate_types(ctx, function, inst)?;
        }
    }

    let structure = analysis
        .structure_result()
        .map_err(|e| invalid(format!("Function {}: {}", function_id, e)))?;

    for (from, to) in cfg.edges() {
        if cfg.is_reachable(from) && !structure.edge_is_structured(from, to) {
            return Err(invalid(format!(
                "Edge {} -> {} breaks structured control flow",
                from, to
            )));
        }
    }

    for block in &function.blocks {
        if !cfg.is_reachable(block.id) || block.is_header() {
            continue;
        }
        let inner_targets = cfg
            .successors(block.id)
            .iter()
            .filter(|t| !structure.is_structured_exit(block.id, **t))
            .count();
        if inner_targets > 1 {
            return Err(invalid(format!(
                "Block {} branches to several blocks without a merge instruction",
                block.id
            )));
        }
    }

    for construct in structure.constructs() {
        if dom.is_reachable(construct.merge) && !dom.dominates(construct.header, construct.merge) {
            return Err(invalid(format!(
                "Header {} does not dominate its merge block {}",
                construct.header, construct.merge
            )));
        }
        if construct.is_loop() {
            let back_edges = structure
                .back_edges()
                .iter()
                .filter(|(_, to)| *to == construct.header)
                .count();
            if back_edges > 1 {
                return Err(invalid(format!(
                    "Loop header {} has {} back edges",
                    construct.header, back_edges
                )));
            }
        }
    }

    Ok(())
}

fn validate_block_shape(block: &BasicBlock, is_entry: bool) -> Result<()> {
    let len = block.len();
    match block.instructions.last() {
        Some(last) if last.is_terminator() => {}
        _ => return Err(invalid(format!("Block {} does not end in a terminator", block.id))),
    }

    let first_non_phi = block.first_non_phi_index();
    let mut in_variables = is_entry;
    for (i, inst) in block.instructions.iter().enumerate() {
        if inst.is_terminator() && i + 1 != len {
            return Err(invalid(format!("Block {} has a terminator mid-block", block.id)));
        }
        if inst.opcode.is_merge() {
            if i + 2 != len {
                return Err(invalid(format!(
                    "Merge instruction in block {} is not second to last",
                    block.id
                )));
            }
            let terminator = block.instructions[len - 1].opcode;
            let allowed = match inst.opcode {
                Opcode::SelectionMerge => {
                    matches!(terminator, Opcode::BranchConditional | Opcode::Switch)
                }
                _ => matches!(terminator, Opcode::Branch | Opcode::BranchConditional),
            };
            if !allowed {
                return Err(invalid(format!(
                    "Merge instruction in block {} precedes {:?}",
                    block.id, terminator
                )));
            }
        }
        if inst.opcode == Opcode::Phi && i >= first_non_phi {
            return Err(invalid(format!("Phi in block {} follows a non-phi", block.id)));
        }
        if inst.opcode == Opcode::Variable {
            if !in_variables {
                return Err(invalid(format!(
                    "Variable {:?} is not at the start of the entry block",
                    inst.result_id
                )));
            }
            if inst.literal_operand(0) != Some(StorageClass::Function.to_literal()) {
                return Err(invalid(format!(
                    "Local variable {:?} does not have Function storage",
                    inst.result_id
                )));
            }
        } else {
            in_variables = false;
        }
    }
    Ok(())
}

fn validate_phis(ctx: &IrContext, block: &BasicBlock, predecessors: &[Id]) -> Result<()> {
    let mut expected = predecessors.to_vec();
    expected.sort_unstable();

    for phi in block.phis() {
        let incoming = phi.phi_incoming();
        if incoming.len() * 2 != phi.operands.len() {
            return Err(invalid(format!("Malformed phi {:?}", phi.result_id)));
        }
        let module = ctx.module();
        if phi.result_type.map_or(false, |t| module.is_pointer_type(t)) && !module.has_variable_pointers() {
            return Err(invalid(format!(
                "Phi {:?} in block {} has pointer type without variable pointers",
                phi.result_id, block.id
            )));
        }
        let mut parents: Vec<Id> = incoming.iter().map(|(_, parent)| *parent).collect();
        parents.sort_unstable();
        if parents != expected {
            return Err(invalid(format!(
                "Phi {:?} in block {} names parents {:?} but the predecessors are {:?}",
                phi.result_id, block.id, parents, expected
            )));
        }
        for (value, _) in incoming {
            if let Some(ty) = ctx.type_of(value) {
                if Some(ty) != phi.result_type {
                    return Err(invalid(format!(
                        "Phi {:?} receives {} of the wrong type",
                        phi.result_id, value
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_operands(
    ctx: &IrContext,
    function: &Function,
    block: &BasicBlock,
    index: usize,
    inst: &Instruction,
    reachable: bool,
) -> Result<()> {
    for id in inst.used_ids() {
        if !ctx.is_defined(id) {
            return Err(invalid(format!(
                "Instruction {:?} in block {} uses undefined id {}",
                inst.opcode, block.id, id
            )));
        }
    }
    if let Some(ty) = inst.result_type {
        if inst.opcode != Opcode::Function && !is_type(ctx, ty) {
            return Err(invalid(format!("Result type {} of {:?} is not a type", ty, inst.result_id)));
        }
    }
    if !reachable {
        return Ok(());
    }

    if inst.opcode == Opcode::Phi {
        let analysis = ctx.analysis(function.id());
        for (value, parent) in inst.phi_incoming() {
            let parent_reachable = analysis
                .as_ref()
                .map_or(false, |a| a.cfg.is_reachable(parent));
            if parent_reachable && !ctx.is_available_at_end(value, parent) {
                return Err(invalid(format!(
                    "Phi {:?} operand {} is not available at the end of {}",
                    inst.result_id, value, parent
                )));
            }
        }
        return Ok(());
    }

    for id in inst.id_operands() {
        if ctx.is_label(id) {
            continue;
        }
        if !ctx.is_available_before(id, block.id, index) {
            return Err(invalid(format!(
                "Id {} does not dominate its use by {:?} in block {}",
                id, inst.opcode, block.id
            )));
        }
    }
    Ok(())
}

fn validate_types(ctx: &IrContext, function: &Function, inst: &Instruction) -> Result<()> {
    let module = ctx.module();
    let type_of = |operand: usize| inst.id_operand(operand).and_then(|id| ctx.type_of(id));
    let pointee_of = |operand: usize| type_of(operand).and_then(|t| module.pointer_type_info(t)).map(|(_, p)| p);
    let mismatch = || {
        Err(invalid(format!(
            "Type mismatch in {:?} {:?}",
            inst.opcode, inst.result_id
        )))
    };

    match inst.opcode {
        Opcode::BranchConditional => {
            if !type_of(0).map_or(false, |t| module.is_bool_type(t)) {
                return mismatch();
            }
        }
        Opcode::Load => {
            if pointee_of(0) != inst.result_type {
                return mismatch();
            }
        }
        Opcode::Store => {
            if pointee_of(0).is_none() || pointee_of(0) != type_of(1) {
                return mismatch();
            }
        }
        Opcode::CopyMemory => {
            if pointee_of(0).is_none() || pointee_of(0) != pointee_of(1) {
                return mismatch();
            }
        }
        Opcode::CopyObject => {
            if type_of(0) != inst.result_type {
                return mismatch();
            }
        }
        Opcode::Variable => {
            let Some((storage, pointee)) = inst.result_type.and_then(|t| module.pointer_type_info(t)) else {
                return mismatch();
            };
            if Some(storage.to_literal()) != inst.literal_operand(0) {
                return mismatch();
            }
            if inst.operands.len() > 1 && type_of(1) != Some(pointee) {
                return mismatch();
            }
        }
        Opcode::ReturnValue => {
            if type_of(0) != Some(function.return_type()) {
                return mismatch();
            }
        }
        Opcode::Return => {
            let returns_void = module
                .type_or_value(function.return_type())
                .map_or(false, |t| t.opcode == Opcode::TypeVoid);
            if !returns_void {
                return mismatch();
            }
        }
        Opcode::FunctionCall => {
            let Some(callee) = inst.id_operand(0).and_then(|id| module.function(id)) else {
                return mismatch();
            };
            if inst.result_type != Some(callee.return_type()) {
                return mismatch();
            }
            let args: Vec<Id> = inst.id_operands().skip(1).collect();
            if args.len() != callee.params.len() {
                return mismatch();
            }
            for (arg, param) in args.iter().zip(&callee.params) {
                if ctx.type_of(*arg) != param.result_type {
                    return mismatch();
                }
            }
        }
        Opcode::IAdd
        | Opcode::ISub
        | Opcode::IMul
        | Opcode::SDiv
        | Opcode::SNegate
        | Opcode::FAdd
        | Opcode::FSub
        | Opcode::FMul
        | Opcode::FNegate
        | Opcode::LogicalAnd
        | Opcode::LogicalOr
        | Opcode::LogicalNot => {
            if inst.id_operands().any(|id| ctx.type_of(id) != inst.result_type) {
                return mismatch();
            }
        }
        Opcode::IEqual
        | Opcode::INotEqual
        | Opcode::SLessThan
        | Opcode::SGreaterThan
        | Opcode::LogicalEqual => {
            if !inst.result_type.map_or(false, |t| module.is_bool_type(t)) || type_of(0) != type_of(1) {
                return mismatch();
            }
        }
        Opcode::Select => {
            if !type_of(0).map_or(false, |t| module.is_bool_type(t))
                || type_of(1) != inst.result_type
                || type_of(2) != inst.result_type
            {
                return mismatch();
            }
        }
        _ => {}
    }
    Ok(())
}
