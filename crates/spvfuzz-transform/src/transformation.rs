//! The contract every transformation implements.

use crate::facts::FactLedger;
use crate::transformations::TransformationMessage;
use spvfuzz_core::{FreshIdAllocator, Result};
use spvfuzz_ir::{Id, IrContext, MemoryLocation, Module};
use std::collections::HashSet;

/// State that outlives a single transformation: the fact ledger and the
/// fresh-id allocator
#[derive(Debug, Clone, Default)]
pub struct TransformationContext {
    pub facts: FactLedger,
    pub ids: FreshIdAllocator,
}

impl TransformationContext {
    pub fn new(facts: FactLedger, ids: FreshIdAllocator) -> Self {
        Self { facts, ids }
    }

    /// Fresh ledger and an allocator starting at the module's id bound
    pub fn for_module(module: &Module) -> Self {
        Self {
            facts: FactLedger::new(),
            ids: FreshIdAllocator::new(module.id_bound),
        }
    }

    /// An id is fresh when nothing in the module defines it and it is not
    /// waiting in the overflow pool. `Id::MAX` can never lie below the id
    /// bound, so it is never fresh.
    pub fn is_fresh_id(&self, ir: &IrContext, id: Id) -> bool {
        id != 0 && id != Id::MAX && !ir.is_defined(id) && !self.ids.is_pooled(id)
    }

    /// Every id is fresh and no id appears twice
    pub fn are_fresh_and_distinct(&self, ir: &IrContext, ids: &[Id]) -> bool {
        let mut seen = HashSet::new();
        ids.iter()
            .all(|id| seen.insert(*id) && self.is_fresh_id(ir, *id))
    }

    /// Whether the value stored at `location` may be arbitrary
    pub fn pointee_is_irrelevant(&self, location: &MemoryLocation) -> bool {
        self.facts.pointee_value_is_irrelevant(location.pointer)
            || location
                .root
                .map_or(false, |root| self.facts.pointee_value_is_irrelevant(root))
    }
}

/// A semantics-preserving module rewrite.
///
/// `is_applicable` is a pure query and never fails; unsupported control
/// flow simply makes a transformation inapplicable. `apply` may only be
/// called right after `is_applicable` returned true on the same state. An
/// error from `apply` is a broken caller contract and is fatal.
pub trait Transformation: std::fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn is_applicable(&self, ir: &IrContext, ctx: &TransformationContext) -> bool;

    fn apply(&self, ir: &mut IrContext, ctx: &mut TransformationContext) -> Result<()>;

    /// Serializable description, suitable for replay
    fn to_message(&self) -> TransformationMessage;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn test_fresh_ids() {
        let ir = IrContext::new(chain_module());
        let mut ctx = context_for(&ir);
        assert!(ctx.is_fresh_id(&ir, 100));
        assert!(!ctx.is_fresh_id(&ir, 0));
        assert!(!ctx.is_fresh_id(&ir, VAR));
        assert!(!ctx.is_fresh_id(&ir, Id::MAX));

        ctx.ids.reserve_overflow(2).unwrap();
        let pooled = ir.module().id_bound;
        assert!(!ctx.is_fresh_id(&ir, pooled));
        assert!(!ctx.are_fresh_and_distinct(&ir, &[100, 100]));
        assert!(ctx.are_fresh_and_distinct(&ir, &[100, 101]));
    }
}
