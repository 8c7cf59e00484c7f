//! Fresh-id allocation.
//!
//! Operators normally receive the fresh ids they need from the caller. Some
//! of them (function inlining in particular) may need an unbounded number of
//! ids; those are drawn from an overflow pool that the session reserves up
//! front. Every id handed out is recorded so a session's id usage can be
//! inspected and replayed.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// Result id of an instruction, label, type, constant or function.
pub type Id = u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshIdAllocator {
    next: Id,
    overflow: VecDeque<Id>,
    issued: Vec<Id>,
    reserved: BTreeSet<Id>,
}

impl FreshIdAllocator {
    pub fn new(first_id: Id) -> Self {
        Self {
            next: first_id.max(1),
            overflow: VecDeque::new(),
            issued: Vec::new(),
            reserved: BTreeSet::new(),
        }
    }

    /// Raise the counter so it stays above every id the module uses.
    pub fn observe_bound(&mut self, bound: Id) {
        if bound > self.next {
            self.next = bound;
        }
    }

    fn bump(&mut self) -> Result<Id> {
        let id = self.next;
        self.next = self
            .next
            .checked_add(1)
            .ok_or_else(|| Error::IdOverflow("id space exhausted".to_string()))?;
        self.reserved.insert(id);
        Ok(id)
    }

    /// Issue an id that has never been issued or reserved before.
    pub fn next_id(&mut self) -> Result<Id> {
        let id = self.bump()?;
        self.issued.push(id);
        tracing::trace!(id, "issued fresh id");
        Ok(id)
    }

    /// Move `count` new ids into the overflow pool.
    pub fn reserve_overflow(&mut self, count: u32) -> Result<()> {
        for _ in 0..count {
            let id = self.bump()?;
            self.overflow.push_back(id);
        }
        tracing::debug!(count, pool = self.overflow.len(), "reserved overflow ids");
        Ok(())
    }

    pub fn has_overflow_ids(&self) -> bool {
        !self.overflow.is_empty()
    }

    pub fn overflow_available(&self) -> usize {
        self.overflow.len()
    }

    /// Take the next id from the overflow pool.
    pub fn next_overflow_id(&mut self) -> Result<Id> {
        let id = self.overflow.pop_front().ok_or_else(|| {
            Error::IdOverflow("overflow pool is empty".to_string())
        })?;
        self.issued.push(id);
        Ok(id)
    }

    /// Whether the allocator has ever handed out or pooled this id.
    pub fn is_reserved(&self, id: Id) -> bool {
        self.reserved.contains(&id)
    }

    /// Whether the id sits in the overflow pool, waiting to be drawn. Pooled
    /// ids are not available as caller-supplied fresh ids.
    pub fn is_pooled(&self, id: Id) -> bool {
        self.overflow.contains(&id)
    }

    /// Every id issued so far, in issue order.
    pub fn issued(&self) -> &[Id] {
        &self.issued
    }
}

impl Default for FreshIdAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}
