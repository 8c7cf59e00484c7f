//! Instruction set for the shader IR.

use serde::{Deserialize, Serialize};
pub use spvfuzz_core::Id;

/// Storage class of a variable or pointer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    UniformConstant,
    Input,
    Uniform,
    Output,
    Workgroup,
    Private,
    Function,
    StorageBuffer,
}

impl StorageClass {
    pub fn to_literal(self) -> u32 {
        match self {
            StorageClass::UniformConstant => 0,
            StorageClass::Input => 1,
            StorageClass::Uniform => 2,
            StorageClass::Output => 3,
            StorageClass::Workgroup => 4,
            StorageClass::Private => 6,
            StorageClass::Function => 7,
            StorageClass::StorageBuffer => 12,
        }
    }

    pub fn from_literal(value: u32) -> Option<Self> {
        Some(match value {
            0 => StorageClass::UniformConstant,
            1 => StorageClass::Input,
            2 => StorageClass::Uniform,
            3 => StorageClass::Output,
            4 => StorageClass::Workgroup,
            6 => StorageClass::Private,
            7 => StorageClass::Function,
            12 => StorageClass::StorageBuffer,
            _ => return None,
        })
    }
}

/// IR opcode.
///
/// Only the opcodes the engine reasons about are modeled. Anything else is
/// carried as `Unmodeled` with its numeric opcode so that operators can
/// reject it conservatively instead of guessing its semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // Module-level declarations
    Capability,
    Function,
    FunctionParameter,

    // Types
    TypeVoid,
    TypeBool,
    TypeInt,
    TypeFloat,
    TypeVector,
    TypeArray,
    TypeStruct,
    TypePointer,
    TypeFunction,

    // Constants
    ConstantTrue,
    ConstantFalse,
    Constant,
    ConstantComposite,
    ConstantNull,
    Undef,

    // Memory
    Variable,
    Load,
    Store,
    CopyMemory,
    AccessChain,
    InBoundsAccessChain,

    // Atomics
    AtomicLoad,
    AtomicStore,
    AtomicIAdd,

    // Synchronization
    ControlBarrier,
    MemoryBarrier,

    // Value computation
    Phi,
    CopyObject,
    FunctionCall,
    IAdd,
    ISub,
    IMul,
    SDiv,
    SNegate,
    FAdd,
    FSub,
    FMul,
    FNegate,
    IEqual,
    INotEqual,
    SLessThan,
    SGreaterThan,
    LogicalEqual,
    LogicalAnd,
    LogicalOr,
    LogicalNot,
    Select,
    CompositeConstruct,
    CompositeExtract,
    Bitcast,
    ConvertSToF,
    Nop,

    // Structured control flow
    SelectionMerge,
    LoopMerge,

    // Terminators
    Branch,
    BranchConditional,
    Switch,
    Return,
    ReturnValue,
    Kill,
    TerminateInvocation,
    Unreachable,

    /// An opcode outside the modeled subset
    Unmodeled(u16),
}

/// Memory-touching opcode families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryOp {
    Variable,
    Load,
    Store,
    CopyMemory,
    AccessChain,
    Atomic,
}

/// Coarse opcode categories the engine dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpcodeClass {
    Declaration,
    Type,
    Constant,
    Phi,
    Merge,
    Branch,
    BranchConditional,
    Switch,
    OtherTerminator,
    Memory(MemoryOp),
    Barrier,
    Call,
    Pure,
    Unmodeled,
}

impl Opcode {
    pub fn class(&self) -> OpcodeClass {
        use Opcode::*;
        match self {
            Capability | Function | FunctionParameter => OpcodeClass::Declaration,
            TypeVoid | TypeBool | TypeInt | TypeFloat | TypeVector | TypeArray | TypeStruct
            | TypePointer | TypeFunction => OpcodeClass::Type,
            ConstantTrue | ConstantFalse | Constant | ConstantComposite | ConstantNull | Undef => {
                OpcodeClass::Constant
            }
            Variable => OpcodeClass::Memory(MemoryOp::Variable),
            Load => OpcodeClass::Memory(MemoryOp::Load),
            Store => OpcodeClass::Memory(MemoryOp::Store),
            CopyMemory => OpcodeClass::Memory(MemoryOp::CopyMemory),
            AccessChain | InBoundsAccessChain => OpcodeClass::Memory(MemoryOp::AccessChain),
            AtomicLoad | AtomicStore | AtomicIAdd => OpcodeClass::Memory(MemoryOp::Atomic),
            ControlBarrier | MemoryBarrier => OpcodeClass::Barrier,
            Phi => OpcodeClass::Phi,
            FunctionCall => OpcodeClass::Call,
            CopyObject | IAdd | ISub | IMul | SDiv | SNegate | FAdd | FSub | FMul | FNegate
            | IEqual | INotEqual | SLessThan | SGreaterThan | LogicalEqual | LogicalAnd
            | LogicalOr | LogicalNot | Select | CompositeConstruct | CompositeExtract | Bitcast
            | ConvertSToF | Nop => OpcodeClass::Pure,
            SelectionMerge | LoopMerge => OpcodeClass::Merge,
            Branch => OpcodeClass::Branch,
            BranchConditional => OpcodeClass::BranchConditional,
            Switch => OpcodeClass::Switch,
            Return | ReturnValue | Kill | TerminateInvocation | Unreachable => {
                OpcodeClass::OtherTerminator
            }
            Unmodeled(_) => OpcodeClass::Unmodeled,
        }
    }

    /// Returns true if this opcode ends a block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.class(),
            OpcodeClass::Branch
                | OpcodeClass::BranchConditional
                | OpcodeClass::Switch
                | OpcodeClass::OtherTerminator
        )
    }

    /// Returns true if this opcode leaves the function or the invocation
    pub fn is_function_exit(&self) -> bool {
        matches!(
            self,
            Opcode::Return
                | Opcode::ReturnValue
                | Opcode::Kill
                | Opcode::TerminateInvocation
                | Opcode::Unreachable
        )
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, Opcode::SelectionMerge | Opcode::LoopMerge)
    }

    pub fn is_type(&self) -> bool {
        self.class() == OpcodeClass::Type
    }

    pub fn is_constant(&self) -> bool {
        self.class() == OpcodeClass::Constant
    }

    /// Opcodes whose result can be recomputed anywhere its operands are
    /// available without changing behavior
    pub fn is_pure(&self) -> bool {
        self.class() == OpcodeClass::Pure
    }
}

/// Instruction operand: either a reference to another id or a literal word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Id(Id),
    Literal(u32),
}

impl Operand {
    pub fn as_id(&self) -> Option<Id> {
        match self {
            Operand::Id(id) => Some(*id),
            Operand::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<u32> {
        match self {
            Operand::Literal(value) => Some(*value),
            Operand::Id(_) => None,
        }
    }
}

/// A single instruction in the IR
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub result_type: Option<Id>,
    pub result_id: Option<Id>,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            result_type: None,
            result_id: None,
            operands: Vec::new(),
        }
    }

    pub fn with_result_type(mut self, type_id: Id) -> Self {
        self.result_type = Some(type_id);
        self
    }

    pub fn with_result(mut self, id: Id) -> Self {
        self.result_id = Some(id);
        self
    }

    pub fn with_operand(mut self, operand: Operand) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn with_operands(mut self, operands: Vec<Operand>) -> Self {
        self.operands = operands;
        self
    }

    /// Value-producing instruction `result = opcode(type) operands...`
    pub fn op(opcode: Opcode, result_type: Id, result_id: Id, ids: &[Id]) -> Self {
        Self {
            opcode,
            result_type: Some(result_type),
            result_id: Some(result_id),
            operands: ids.iter().map(|id| Operand::Id(*id)).collect(),
        }
    }

    pub fn copy_object(result_type: Id, result_id: Id, source: Id) -> Self {
        Self::op(Opcode::CopyObject, result_type, result_id, &[source])
    }

    pub fn load(result_type: Id, result_id: Id, pointer: Id) -> Self {
        Self::op(Opcode::Load, result_type, result_id, &[pointer])
    }

    pub fn store(pointer: Id, value: Id) -> Self {
        Self::new(Opcode::Store).with_operands(vec![Operand::Id(pointer), Operand::Id(value)])
    }

    pub fn copy_memory(target: Id, source: Id) -> Self {
        Self::new(Opcode::CopyMemory).with_operands(vec![Operand::Id(target), Operand::Id(source)])
    }

    pub fn access_chain(result_type: Id, result_id: Id, base: Id, indices: &[Id]) -> Self {
        let mut ids = vec![base];
        ids.extend_from_slice(indices);
        Self::op(Opcode::AccessChain, result_type, result_id, &ids)
    }

    pub fn variable(pointer_type: Id, result_id: Id, storage: StorageClass, initializer: Option<Id>) -> Self {
        let mut inst = Self::new(Opcode::Variable)
            .with_result_type(pointer_type)
            .with_result(result_id)
            .with_operand(Operand::Literal(storage.to_literal()));
        if let Some(init) = initializer {
            inst.operands.push(Operand::Id(init));
        }
        inst
    }

    pub fn phi(result_type: Id, result_id: Id, incoming: &[(Id, Id)]) -> Self {
        let mut inst = Self::new(Opcode::Phi).with_result_type(result_type).with_result(result_id);
        for (value, parent) in incoming {
            inst.operands.push(Operand::Id(*value));
            inst.operands.push(Operand::Id(*parent));
        }
        inst
    }

    pub fn function_call(result_type: Id, result_id: Id, function: Id, args: &[Id]) -> Self {
        let mut ids = vec![function];
        ids.extend_from_slice(args);
        Self::op(Opcode::FunctionCall, result_type, result_id, &ids)
    }

    pub fn selection_merge(merge: Id) -> Self {
        Self::new(Opcode::SelectionMerge).with_operands(vec![Operand::Id(merge), Operand::Literal(0)])
    }

    pub fn loop_merge(merge: Id, continue_target: Id) -> Self {
        Self::new(Opcode::LoopMerge).with_operands(vec![
            Operand::Id(merge),
            Operand::Id(continue_target),
            Operand::Literal(0),
        ])
    }

    /// Create a branch instruction
    pub fn branch(target: Id) -> Self {
        Self::new(Opcode::Branch).with_operand(Operand::Id(target))
    }

    /// Create a conditional branch instruction
    pub fn branch_conditional(condition: Id, if_true: Id, if_false: Id) -> Self {
        Self::new(Opcode::BranchConditional).with_operands(vec![
            Operand::Id(condition),
            Operand::Id(if_true),
            Operand::Id(if_false),
        ])
    }

    pub fn switch(selector: Id, default: Id, cases: &[(u32, Id)]) -> Self {
        let mut inst = Self::new(Opcode::Switch)
            .with_operands(vec![Operand::Id(selector), Operand::Id(default)]);
        for (value, target) in cases {
            inst.operands.push(Operand::Literal(*value));
            inst.operands.push(Operand::Id(*target));
        }
        inst
    }

    /// Create a return instruction
    pub fn return_void() -> Self {
        Self::new(Opcode::Return)
    }

    pub fn return_value(value: Id) -> Self {
        Self::new(Opcode::ReturnValue).with_operand(Operand::Id(value))
    }

    pub fn unreachable() -> Self {
        Self::new(Opcode::Unreachable)
    }

    pub fn kill() -> Self {
        Self::new(Opcode::Kill)
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    pub fn id_operand(&self, index: usize) -> Option<Id> {
        self.operands.get(index).and_then(Operand::as_id)
    }

    pub fn literal_operand(&self, index: usize) -> Option<u32> {
        self.operands.get(index).and_then(Operand::as_literal)
    }

    /// Ids referenced by the operands, in operand order
    pub fn id_operands(&self) -> impl Iterator<Item = Id> + '_ {
        self.operands.iter().filter_map(Operand::as_id)
    }

    /// Every id this instruction uses: its result type and its id operands
    pub fn used_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.result_type.into_iter().chain(self.id_operands())
    }

    /// Rewrite every id operand equal to `from`; returns how many changed
    pub fn replace_id_operands(&mut self, from: Id, to: Id) -> usize {
        let mut count = 0;
        for operand in &mut self.operands {
            if *operand == Operand::Id(from) {
                *operand = Operand::Id(to);
                count += 1;
            }
        }
        count
    }

    /// Successor labels of a terminator, in operand order, without duplicates
    pub fn branch_targets(&self) -> Vec<Id> {
        let raw: Vec<Id> = match self.opcode {
            Opcode::Branch => self.id_operand(0).into_iter().collect(),
            Opcode::BranchConditional => [1, 2].iter().filter_map(|i| self.id_operand(*i)).collect(),
            Opcode::Switch => {
                let mut targets: Vec<Id> = self.id_operand(1).into_iter().collect();
                let mut i = 3;
                while i < self.operands.len() {
                    if let Some(target) = self.id_operand(i) {
                        targets.push(target);
                    }
                    i += 2;
                }
                targets
            }
            _ => Vec::new(),
        };
        let mut targets = Vec::with_capacity(raw.len());
        for id in raw {
            if !targets.contains(&id) {
                targets.push(id);
            }
        }
        targets
    }

    /// Replace every reference to successor `from` with `to`
    pub fn retarget(&mut self, from: Id, to: Id) {
        let slots: Vec<usize> = match self.opcode {
            Opcode::Branch => vec![0],
            Opcode::BranchConditional => vec![1, 2],
            Opcode::Switch => {
                let mut slots = vec![1];
                slots.extend((3..self.operands.len()).step_by(2));
                slots
            }
            _ => Vec::new(),
        };
        for slot in slots {
            if self.operands.get(slot) == Some(&Operand::Id(from)) {
                self.operands[slot] = Operand::Id(to);
            }
        }
    }

    /// Merge block named by a merge instruction
    pub fn merge_target(&self) -> Option<Id> {
        if self.opcode.is_merge() {
            self.id_operand(0)
        } else {
            None
        }
    }

    /// Continue target named by an `OpLoopMerge`
    pub fn continue_target(&self) -> Option<Id> {
        if self.opcode == Opcode::LoopMerge {
            self.id_operand(1)
        } else {
            None
        }
    }

    /// `(value, parent)` pairs of a phi
    pub fn phi_incoming(&self) -> Vec<(Id, Id)> {
        if self.opcode != Opcode::Phi {
            return Vec::new();
        }
        self.operands
            .chunks(2)
            .filter_map(|pair| match pair {
                [Operand::Id(value), Operand::Id(parent)] => Some((*value, *parent)),
                _ => None,
            })
            .collect()
    }

    /// Value flowing into a phi from `parent`
    pub fn phi_value_for(&self, parent: Id) -> Option<Id> {
        self.phi_incoming()
            .into_iter()
            .find(|(_, p)| *p == parent)
            .map(|(value, _)| value)
    }

    pub fn add_phi_incoming(&mut self, value: Id, parent: Id) {
        self.operands.push(Operand::Id(value));
        self.operands.push(Operand::Id(parent));
    }

    /// Drop every incoming pair whose parent is `parent`
    pub fn remove_phi_incoming(&mut self, parent: Id) {
        let kept: Vec<Operand> = self
            .operands
            .chunks(2)
            .filter(|pair| pair.get(1) != Some(&Operand::Id(parent)))
            .flat_map(|pair| pair.iter().copied())
            .collect();
        self.operands = kept;
    }

    /// Rename the parent block of phi incoming pairs
    pub fn replace_phi_parent(&mut self, from: Id, to: Id) {
        for pair in self.operands.chunks_mut(2) {
            if let [_, parent] = pair {
                if *parent == Operand::Id(from) {
                    *parent = Operand::Id(to);
                }
            }
        }
    }
}
