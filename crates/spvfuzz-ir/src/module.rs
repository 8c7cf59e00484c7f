//! Module structure: functions made of basic blocks, plus the module-level
//! type/constant table and global declarations.

use crate::instruction::{Id, Instruction, Opcode, Operand, StorageClass};
use serde::{Deserialize, Serialize};

/// Operand of the capability declaration that allows pointer-typed phis
pub const CAPABILITY_VARIABLE_POINTERS: u32 = 4442;

/// A basic block: a label followed by instructions, the last of which is
/// the terminator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: Id,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            instructions: Vec::new(),
        }
    }

    pub fn with_instructions(id: Id, instructions: Vec<Instruction>) -> Self {
        Self { id, instructions }
    }

    pub fn add_instruction(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|inst| inst.is_terminator())
    }

    pub fn terminator_mut(&mut self) -> Option<&mut Instruction> {
        self.instructions.last_mut().filter(|inst| inst.is_terminator())
    }

    /// Index of the merge instruction, if the block is a header
    pub fn merge_index(&self) -> Option<usize> {
        let len = self.instructions.len();
        if len >= 2 && self.instructions[len - 2].opcode.is_merge() {
            Some(len - 2)
        } else {
            None
        }
    }

    pub fn merge_instruction(&self) -> Option<&Instruction> {
        self.merge_index().map(|i| &self.instructions[i])
    }

    pub fn is_header(&self) -> bool {
        self.merge_index().is_some()
    }

    pub fn is_loop_header(&self) -> bool {
        self.merge_instruction()
            .map_or(false, |inst| inst.opcode == Opcode::LoopMerge)
    }

    /// Where new non-phi code may be appended: before the merge instruction
    /// of a header, otherwise before the terminator
    pub fn insertion_point_before_terminator(&self) -> usize {
        self.merge_index()
            .unwrap_or_else(|| self.instructions.len().saturating_sub(1))
    }

    pub fn successors(&self) -> Vec<Id> {
        self.terminator().map(Instruction::branch_targets).unwrap_or_default()
    }

    pub fn phis(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().take_while(|inst| inst.opcode == Opcode::Phi)
    }

    pub fn phis_mut(&mut self) -> impl Iterator<Item = &mut Instruction> {
        self.instructions
            .iter_mut()
            .take_while(|inst| inst.opcode == Opcode::Phi)
    }

    /// Index of the first instruction that is not a phi
    pub fn first_non_phi_index(&self) -> usize {
        self.phis().count()
    }

    /// Index of the first instruction that is neither a phi nor a function
    /// variable
    pub fn first_body_index(&self) -> usize {
        self.instructions
            .iter()
            .position(|inst| inst.opcode != Opcode::Phi && inst.opcode != Opcode::Variable)
            .unwrap_or(self.instructions.len())
    }

    /// Position of the instruction defining `id` in this block
    pub fn position_of(&self, id: Id) -> Option<usize> {
        self.instructions
            .iter()
            .position(|inst| inst.result_id == Some(id))
    }
}

/// A function: its defining instruction, parameters and blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub def: Instruction,
    pub params: Vec<Instruction>,
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn new(id: Id, return_type: Id, function_type: Id) -> Self {
        Self {
            def: Instruction::new(Opcode::Function)
                .with_result_type(return_type)
                .with_result(id)
                .with_operands(vec![Operand::Literal(0), Operand::Id(function_type)]),
            params: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn add_param(&mut self, type_id: Id, id: Id) {
        self.params.push(
            Instruction::new(Opcode::FunctionParameter)
                .with_result_type(type_id)
                .with_result(id),
        );
    }

    pub fn add_block(&mut self, block: BasicBlock) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    pub fn id(&self) -> Id {
        self.def.result_id.unwrap_or(0)
    }

    pub fn return_type(&self) -> Id {
        self.def.result_type.unwrap_or(0)
    }

    pub fn function_type(&self) -> Option<Id> {
        self.def.id_operand(1)
    }

    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn entry_mut(&mut self) -> Option<&mut BasicBlock> {
        self.blocks.first_mut()
    }

    pub fn block_index(&self, id: Id) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    pub fn block(&self, id: Id) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: Id) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Count total instructions in the function
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }

    /// Whether any instruction in the function calls `callee`
    pub fn calls(&self, callee: Id) -> bool {
        self.blocks.iter().flat_map(|b| &b.instructions).any(|inst| {
            inst.opcode == Opcode::FunctionCall && inst.id_operand(0) == Some(callee)
        })
    }
}

/// A complete shader module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub capabilities: Vec<Instruction>,
    pub types_and_values: Vec<Instruction>,
    pub globals: Vec<Instruction>,
    pub functions: Vec<Function>,
    pub id_bound: Id,
}

impl Module {
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
            types_and_values: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            id_bound: 1,
        }
    }

    /// Make sure `id` lies below the id bound
    pub fn claim_id(&mut self, id: Id) {
        if id >= self.id_bound {
            self.id_bound = id.saturating_add(1);
        }
    }

    /// Append a type or constant declaration
    pub fn add_type_or_value(&mut self, inst: Instruction) {
        if let Some(id) = inst.result_id {
            self.claim_id(id);
        }
        self.types_and_values.push(inst);
    }

    pub fn add_global(&mut self, inst: Instruction) {
        if let Some(id) = inst.result_id {
            self.claim_id(id);
        }
        self.globals.push(inst);
    }

    pub fn add_function(&mut self, function: Function) -> usize {
        self.functions.push(function);
        self.id_bound = self.id_bound.max(self.compute_id_bound());
        self.functions.len() - 1
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    pub fn function(&self, id: Id) -> Option<&Function> {
        self.functions.iter().find(|f| f.id() == id)
    }

    pub fn function_mut(&mut self, id: Id) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.id() == id)
    }

    pub fn function_index(&self, id: Id) -> Option<usize> {
        self.functions.iter().position(|f| f.id() == id)
    }

    /// Locate a block by label: `(function index, block index)`
    pub fn find_block(&self, id: Id) -> Option<(usize, usize)> {
        self.functions.iter().enumerate().find_map(|(fi, f)| {
            f.block_index(id).map(|bi| (fi, bi))
        })
    }

    pub fn block(&self, id: Id) -> Option<&BasicBlock> {
        self.find_block(id)
            .map(|(fi, bi)| &self.functions[fi].blocks[bi])
    }

    pub fn block_mut(&mut self, id: Id) -> Option<&mut BasicBlock> {
        let (fi, bi) = self.find_block(id)?;
        Some(&mut self.functions[fi].blocks[bi])
    }

    /// Type or constant declaration with the given result id
    pub fn type_or_value(&self, id: Id) -> Option<&Instruction> {
        self.types_and_values
            .iter()
            .find(|inst| inst.result_id == Some(id))
    }

    /// Structural lookup in the type table, used to avoid duplicate types
    pub fn find_type(&self, opcode: Opcode, operands: &[Operand]) -> Option<Id> {
        self.types_and_values
            .iter()
            .find(|inst| inst.opcode == opcode && inst.operands == operands)
            .and_then(|inst| inst.result_id)
    }

    pub fn find_bool_type(&self) -> Option<Id> {
        self.find_type(Opcode::TypeBool, &[])
    }

    pub fn find_pointer_type(&self, storage: StorageClass, pointee: Id) -> Option<Id> {
        self.find_type(
            Opcode::TypePointer,
            &[Operand::Literal(storage.to_literal()), Operand::Id(pointee)],
        )
    }

    pub fn find_bool_constant(&self, value: bool) -> Option<Id> {
        let bool_type = self.find_bool_type()?;
        let opcode = if value {
            Opcode::ConstantTrue
        } else {
            Opcode::ConstantFalse
        };
        self.types_and_values
            .iter()
            .find(|inst| inst.opcode == opcode && inst.result_type == Some(bool_type))
            .and_then(|inst| inst.result_id)
    }

    /// `(storage class, pointee type)` of a pointer type
    pub fn pointer_type_info(&self, pointer_type: Id) -> Option<(StorageClass, Id)> {
        let inst = self.type_or_value(pointer_type)?;
        if inst.opcode != Opcode::TypePointer {
            return None;
        }
        let storage = StorageClass::from_literal(inst.literal_operand(0)?)?;
        Some((storage, inst.id_operand(1)?))
    }

    pub fn is_bool_type(&self, type_id: Id) -> bool {
        self.type_or_value(type_id)
            .map_or(false, |inst| inst.opcode == Opcode::TypeBool)
    }

    pub fn is_pointer_type(&self, type_id: Id) -> bool {
        self.type_or_value(type_id)
            .map_or(false, |inst| inst.opcode == Opcode::TypePointer)
    }

    pub fn declares_capability(&self, capability: u32) -> bool {
        self.capabilities
            .iter()
            .any(|inst| inst.opcode == Opcode::Capability && inst.literal_operand(0) == Some(capability))
    }

    /// Whether pointers may flow through phis and selects
    pub fn has_variable_pointers(&self) -> bool {
        self.declares_capability(CAPABILITY_VARIABLE_POINTERS)
    }

    /// Literal value of a 32-bit scalar constant
    pub fn constant_literal(&self, id: Id) -> Option<u32> {
        let inst = self.type_or_value(id)?;
        match inst.opcode {
            Opcode::Constant => inst.literal_operand(0),
            Opcode::ConstantTrue => Some(1),
            Opcode::ConstantFalse | Opcode::ConstantNull => Some(0),
            _ => None,
        }
    }

    /// Recompute the id bound from scratch
    pub fn compute_id_bound(&self) -> Id {
        let module_level = self
            .capabilities
            .iter()
            .chain(&self.types_and_values)
            .chain(&self.globals)
            .filter_map(|inst| inst.result_id);
        let function_level = self.functions.iter().flat_map(|f| {
            std::iter::once(&f.def)
                .chain(&f.params)
                .filter_map(|inst| inst.result_id)
                .chain(f.blocks.iter().flat_map(|b| {
                    std::iter::once(b.id).chain(b.instructions.iter().filter_map(|inst| inst.result_id))
                }))
        });
        module_level
            .chain(function_level)
            .max()
            .unwrap_or(0)
            .saturating_add(1)
    }

    /// Count total instructions in the module's functions
    pub fn total_instructions(&self) -> usize {
        self.functions.iter().map(|f| f.instruction_count()).sum()
    }

    /// Serialize the module to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, spvfuzz_core::Error> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a module from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, spvfuzz_core::Error> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn to_json(&self) -> Result<String, spvfuzz_core::Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, spvfuzz_core::Error> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_block() {
        let mut block = BasicBlock::new(10);
        assert!(block.is_empty());
        assert!(block.terminator().is_none());

        block.add_instruction(Instruction::selection_merge(12));
        block.add_instruction(Instruction::branch_conditional(3, 11, 12));
        assert_eq!(block.len(), 2);
        assert!(block.is_header());
        assert!(!block.is_loop_header());
        assert_eq!(block.insertion_point_before_terminator(), 0);
        assert_eq!(block.successors(), vec![11, 12]);
    }

    #[test]
    fn test_function() {
        let mut func = Function::new(5, 1, 2);
        assert_eq!(func.id(), 5);
        assert_eq!(func.num_blocks(), 0);

        func.add_block(BasicBlock::with_instructions(6, vec![Instruction::return_void()]));
        assert_eq!(func.num_blocks(), 1);
        assert_eq!(func.entry().map(|b| b.id), Some(6));
        assert_eq!(func.instruction_count(), 1);
    }

    #[test]
    fn test_type_lookup() {
        let mut module = Module::new();
        module.add_type_or_value(Instruction::new(Opcode::TypeBool).with_result(2));
        module.add_type_or_value(
            Instruction::new(Opcode::ConstantTrue).with_result_type(2).with_result(3),
        );
        module.add_type_or_value(Instruction::new(Opcode::TypePointer).with_result(4).with_operands(
            vec![Operand::Literal(StorageClass::Function.to_literal()), Operand::Id(2)],
        ));

        assert_eq!(module.find_bool_type(), Some(2));
        assert_eq!(module.find_bool_constant(true), Some(3));
        assert_eq!(module.find_bool_constant(false), None);
        assert_eq!(module.find_pointer_type(StorageClass::Function, 2), Some(4));
        assert_eq!(module.pointer_type_info(4), Some((StorageClass::Function, 2)));
        assert_eq!(module.id_bound, 5);
    }

    #[test]
    fn test_module_serialization() {
        let mut module = Module::new();
        module.add_type_or_value(Instruction::new(Opcode::TypeVoid).with_result(1));
        let bytes = module.to_bytes().unwrap();
        let decoded = Module::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, module);

        let json = module.to_json().unwrap();
        assert_eq!(Module::from_json(&json).unwrap(), module);
    }

    #[test]
    fn test_compute_id_bound() {
        let mut module = Module::new();
        module.add_type_or_value(Instruction::new(Opcode::TypeVoid).with_result(1));
        let mut func = Function::new(3, 1, 2);
        func.add_block(BasicBlock::with_instructions(40, vec![Instruction::return_void()]));
        module.add_function(func);
        assert_eq!(module.compute_id_bound(), 41);
    }
}
