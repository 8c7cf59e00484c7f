//! Semantics-preserving transformations over the shader IR.
//!
//! Every transformation answers `is_applicable` against the current module
//! and fact ledger, and `apply` rewrites the module in place. A
//! [`Session`] threads the module, the ledger and the fresh-id allocator
//! through a sequence of transformations.

pub mod descriptor;
pub mod facts;
pub mod session;
pub mod transformation;
pub mod transformations;

mod util;

#[cfg(test)]
mod test_util;

pub use descriptor::{IdUseDescriptor, InstructionDescriptor, InstructionPosition};
pub use facts::{DataDescriptor, Fact, FactLedger};
pub use session::{Outcome, Session};
pub use transformation::{Transformation, TransformationContext};
pub use transformations::*;
