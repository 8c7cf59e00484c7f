//! Shader IR: module model, control-flow analyses, memory effects and the
//! structural validator.

pub mod cfg;
pub mod context;
pub mod dominators;
pub mod instruction;
pub mod memory;
pub mod module;
pub mod structure;
pub mod validation;

pub use cfg::Cfg;
pub use context::{DefSite, FunctionAnalysis, IrContext, UseSite};
pub use dominators::DominatorTree;
pub use instruction::{Id, Instruction, MemoryOp, Opcode, OpcodeClass, Operand, StorageClass};
pub use memory::{MemoryEffect, MemoryLocation};
pub use module::{BasicBlock, Function, Module, CAPABILITY_VARIABLE_POINTERS};
pub use structure::{Construct, ConstructKind, Placement, StructuredCfg};
pub use validation::{validate_function, validate_module};
