//! Dominator tree computation.
//!
//! A block `d` **dominates** a block `n` if every path from the function
//! entry to `n` passes through `d`. The **immediate dominator** of `n` is the
//! unique strict dominator of `n` that does not strictly dominate any other
//! strict dominator of `n`. Making each block's immediate dominator its
//! parent yields the dominator tree, rooted at the entry block.
//!
//! # Algorithm
//!
//! The tree is computed with the iterative data-flow algorithm of Cooper,
//! Harvey and Kennedy ("A Simple, Fast Dominance Algorithm"). Blocks are
//! numbered in reverse post-order; the immediate dominator of each block is
//! refined by intersecting the dominator chains of its already-processed
//! predecessors until a fixed point is reached. For the reducible graphs that
//! structured control flow produces this converges in two passes.
//!
//! # Unreachable blocks
//!
//! Blocks that cannot be reached from the entry are not part of the tree. No
//! block dominates an unreachable block except the block itself, and an
//! unreachable block dominates nothing else. Callers that check def-use
//! dominance skip uses located in unreachable blocks.

use crate::cfg::Cfg;
use crate::instruction::Id;
use std::collections::HashMap;

/// Result of dominator tree computation for one function.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: Option<Id>,
    /// Immediate dominator of every reachable non-entry block
    idom: HashMap<Id, Id>,
    /// Reverse post-order index of every reachable block
    order: HashMap<Id, usize>,
}

impl DominatorTree {
    /// Compute the dominator tree of a control-flow graph.
    pub fn compute(cfg: &Cfg) -> Self {
        let rpo = cfg.reverse_post_order();
        let order: HashMap<Id, usize> = rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let n = rpo.len();
        if n == 0 {
            return Self {
                entry: None,
                idom: HashMap::new(),
                order,
            };
        }

        let mut idom: Vec<Option<usize>> = vec![None; n];
        idom[0] = Some(0);

        let mut changed = true;
        while changed {
            changed = false;
            for b in 1..n {
                let mut new_idom: Option<usize> = None;
                for pred in cfg.predecessors(rpo[b]) {
                    let Some(&p) = order.get(pred) else {
                        continue;
                    };
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => intersect(&idom, p, current),
                    });
                }
                if new_idom.is_some() && idom[b] != new_idom {
                    idom[b] = new_idom;
                    changed = true;
                }
            }
        }

        let idom = (1..n)
            .filter_map(|b| idom[b].map(|d| (rpo[b], rpo[d])))
            .collect();

        Self {
            entry: Some(rpo[0]),
            idom,
            order,
        }
    }

    /// Returns the entry (root) block of the tree.
    pub fn entry(&self) -> Option<Id> {
        self.entry
    }

    pub fn is_reachable(&self, block: Id) -> bool {
        self.order.contains_key(&block)
    }

    /// Returns the immediate dominator of a block, or `None` for the entry
    /// and for unreachable blocks.
    pub fn immediate_dominator(&self, block: Id) -> Option<Id> {
        self.idom.get(&block).copied()
    }

    /// Checks if block `a` dominates block `b`.
    ///
    /// A block dominates itself.
    ///
    /// # Complexity
    ///
    /// O(depth) where depth is the depth of `b` in the dominator tree.
    pub fn dominates(&self, a: Id, b: Id) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        while let Some(parent) = self.immediate_dominator(current) {
            if parent == a {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Strict dominance excludes self-dominance.
    pub fn strictly_dominates(&self, a: Id, b: Id) -> bool {
        a != b && self.dominates(a, b)
    }

    /// All dominators of a block, from the block itself up to the entry.
    pub fn dominator_chain(&self, block: Id) -> Vec<Id> {
        if !self.is_reachable(block) {
            return Vec::new();
        }
        let mut chain = vec![block];
        let mut current = block;
        while let Some(parent) = self.immediate_dominator(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Blocks whose immediate dominator is `block`, in reverse post-order.
    pub fn children(&self, block: Id) -> Vec<Id> {
        let mut children: Vec<Id> = self
            .idom
            .iter()
            .filter(|(_, parent)| **parent == block)
            .map(|(child, _)| *child)
            .collect();
        children.sort_by_key(|c| self.order.get(c).copied().unwrap_or(usize::MAX));
        children
    }

    /// Position of a reachable block in reverse post-order.
    pub fn rpo_index(&self, block: Id) -> Option<usize> {
        self.order.get(&block).copied()
    }
}

fn intersect(idom: &[Option<usize>], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while a > b {
            a = idom[a].unwrap_or(0);
        }
        while b > a {
            b = idom[b].unwrap_or(0);
        }
    }
    a
}
