//! A transformation session owns one module together with the fact ledger
//! and fresh-id allocator that persist across transformations.

use crate::facts::{DataDescriptor, FactLedger};
use crate::transformation::{Transformation, TransformationContext};
use crate::transformations::TransformationMessage;
use spvfuzz_core::{Error, FreshIdAllocator, Id, Result, SessionConfig};
use spvfuzz_ir::{validation, IrContext, Module};
use tracing::{debug, info, instrument, warn};

/// What happened to a transformation handed to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Not applicable to the current state; nothing changed
    Rejected,
}

pub struct Session {
    ir: IrContext,
    context: TransformationContext,
    applied: Vec<TransformationMessage>,
    config: SessionConfig,
}

impl Session {
    pub fn new(module: Module, config: SessionConfig) -> Result<Self> {
        let first = config.first_fresh_id.max(module.id_bound);
        let mut ids = FreshIdAllocator::new(first);
        ids.reserve_overflow(config.overflow_pool_size)?;
        debug!(first_fresh_id = first, pool = config.overflow_pool_size, "session started");
        Ok(Self {
            ir: IrContext::new(module),
            context: TransformationContext::new(FactLedger::new(), ids),
            applied: Vec::new(),
            config,
        })
    }

    /// Check and, if applicable, apply a transformation.
    ///
    /// An `Err` means the module can no longer be trusted: a transformation
    /// broke its contract or the id space ran out.
    #[instrument(skip(self, transformation), fields(name = transformation.name()))]
    pub fn apply(&mut self, transformation: &dyn Transformation) -> Result<Outcome> {
        if !transformation.is_applicable(&self.ir, &self.context) {
            debug!("not applicable");
            return Ok(Outcome::Rejected);
        }
        transformation.apply(&mut self.ir, &mut self.context)?;

        if self.config.validate_after_apply {
            if let Err(e) = validation::validate_context(&self.ir) {
                warn!(error = %e, "module invalid after apply");
                return Err(Error::ContractViolation(format!(
                    "{} produced an invalid module: {}",
                    transformation.name(),
                    e
                )));
            }
        }
        self.context.ids.observe_bound(self.ir.module().id_bound);
        if self.config.record_applied {
            self.applied.push(transformation.to_message());
        }
        debug!(facts = self.context.facts.version(), "applied");
        Ok(Outcome::Applied)
    }

    pub fn apply_message(&mut self, message: &TransformationMessage) -> Result<Outcome> {
        let transformation = message.clone().into_transformation();
        self.apply(transformation.as_ref())
    }

    /// Replay a sequence of messages, returning how many were applied.
    /// With `stop_on_rejection` the first inapplicable message ends the run.
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub fn apply_all(&mut self, messages: &[TransformationMessage], stop_on_rejection: bool) -> Result<usize> {
        let mut applied = 0;
        for (index, message) in messages.iter().enumerate() {
            match self.apply_message(message)? {
                Outcome::Applied => applied += 1,
                Outcome::Rejected if stop_on_rejection => {
                    info!(index, "stopping at rejected transformation");
                    break;
                }
                Outcome::Rejected => {}
            }
        }
        info!(applied, rejected = messages.len() - applied, "sequence finished");
        Ok(applied)
    }

    /// Next id the allocator hands out for a caller to pass to an operator
    pub fn next_fresh_id(&mut self) -> Result<Id> {
        self.context.ids.observe_bound(self.ir.module().id_bound);
        self.context.ids.next_id()
    }

    pub fn ir(&self) -> &IrContext {
        &self.ir
    }

    pub fn module(&self) -> &Module {
        self.ir.module()
    }

    pub fn context(&self) -> &TransformationContext {
        &self.context
    }

    pub fn facts(&self) -> &FactLedger {
        &self.context.facts
    }

    pub fn applied(&self) -> &[TransformationMessage] {
        &self.applied
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn into_module(self) -> Module {
        self.ir.into_module()
    }

    pub fn is_block_dead(&self, block: Id) -> bool {
        self.context.facts.is_block_dead(block)
    }

    pub fn is_id_irrelevant(&self, id: Id) -> bool {
        self.context.facts.is_id_irrelevant(id)
    }

    pub fn pointee_value_is_irrelevant(&self, pointer: Id) -> bool {
        self.context.facts.pointee_value_is_irrelevant(pointer)
    }

    pub fn are_synonymous(&self, a: Id, b: Id) -> bool {
        self.context
            .facts
            .are_synonymous(&DataDescriptor::id(a), &DataDescriptor::id(b))
    }
}
