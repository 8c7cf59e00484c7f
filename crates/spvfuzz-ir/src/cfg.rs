//! Control-flow graph construction for a single function.
//!
//! Blocks are addressed by their label ids; all adjacency is derived from the
//! terminators and never stored in the module itself.

use crate::instruction::Id;
use crate::module::Function;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct Cfg {
    entry: Option<Id>,
    layout: Vec<Id>,
    successors: HashMap<Id, Vec<Id>>,
    predecessors: HashMap<Id, Vec<Id>>,
    reverse_post_order: Vec<Id>,
    reachable: HashSet<Id>,
}

impl Cfg {
    pub fn new(function: &Function) -> Self {
        let layout: Vec<Id> = function.blocks.iter().map(|b| b.id).collect();
        let known: HashSet<Id> = layout.iter().copied().collect();

        let mut successors: HashMap<Id, Vec<Id>> = HashMap::new();
        let mut predecessors: HashMap<Id, Vec<Id>> = HashMap::new();
        for id in &layout {
            successors.entry(*id).or_default();
            predecessors.entry(*id).or_default();
        }

        for block in &function.blocks {
            // Targets outside the function are a validation problem, not a
            // CFG edge
            let targets: Vec<Id> = block
                .successors()
                .into_iter()
                .filter(|t| known.contains(t))
                .collect();
            for target in &targets {
                predecessors.entry(*target).or_default().push(block.id);
            }
            successors.insert(block.id, targets);
        }

        let entry = layout.first().copied();
        let reverse_post_order = match entry {
            Some(entry) => reverse_post_order(entry, |b| {
                successors.get(&b).cloned().unwrap_or_default()
            }),
            None => Vec::new(),
        };
        let reachable = reverse_post_order.iter().copied().collect();

        Self {
            entry,
            layout,
            successors,
            predecessors,
            reverse_post_order,
            reachable,
        }
    }

    pub fn entry(&self) -> Option<Id> {
        self.entry
    }

    /// Block labels in layout order
    pub fn blocks(&self) -> &[Id] {
        &self.layout
    }

    pub fn contains(&self, block: Id) -> bool {
        self.successors.contains_key(&block)
    }

    pub fn successors(&self, block: Id) -> &[Id] {
        self.successors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, block: Id) -> &[Id] {
        self.predecessors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_reachable(&self, block: Id) -> bool {
        self.reachable.contains(&block)
    }

    /// Reachable blocks in reverse post-order from the entry
    pub fn reverse_post_order(&self) -> &[Id] {
        &self.reverse_post_order
    }

    /// Every edge `(from, to)` in layout order of `from`
    pub fn edges(&self) -> Vec<(Id, Id)> {
        self.layout
            .iter()
            .flat_map(|from| self.successors(*from).iter().map(move |to| (*from, *to)))
            .collect()
    }

    /// Blocks reachable from `start` without passing through `stop`
    pub fn reachable_from(&self, start: Id, stop: Option<Id>) -> HashSet<Id> {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(block) = stack.pop() {
            if Some(block) == stop || !seen.insert(block) {
                continue;
            }
            stack.extend(self.successors(block).iter().copied());
        }
        seen
    }
}

/// Iterative depth-first reverse post-order over an arbitrary successor
/// function. Successors are visited in the order returned.
pub fn reverse_post_order<F>(entry: Id, mut successors: F) -> Vec<Id>
where
    F: FnMut(Id) -> Vec<Id>,
{
    let mut visited = HashSet::new();
    let mut post_order = Vec::new();
    let mut stack: Vec<(Id, Vec<Id>, usize)> = Vec::new();

    visited.insert(entry);
    let first = successors(entry);
    stack.push((entry, first, 0));

    while let Some((block, succs, next)) = stack.last_mut() {
        if *next < succs.len() {
            let succ = succs[*next];
            *next += 1;
            if visited.insert(succ) {
                let succ_succs = successors(succ);
                stack.push((succ, succ_succs, 0));
            }
        } else {
            post_order.push(*block);
            stack.pop();
        }
    }

    post_order.reverse();
    post_order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::module::BasicBlock;

    fn diamond() -> Function {
        let mut f = Function::new(1, 2, 3);
        f.add_block(BasicBlock::with_instructions(
            10,
            vec![
                Instruction::selection_merge(13),
                Instruction::branch_conditional(4, 11, 12),
            ],
        ));
        f.add_block(BasicBlock::with_instructions(11, vec![Instruction::branch(13)]));
        f.add_block(BasicBlock::with_instructions(12, vec![Instruction::branch(13)]));
        f.add_block(BasicBlock::with_instructions(13, vec![Instruction::return_void()]));
        f.add_block(BasicBlock::with_instructions(14, vec![Instruction::branch(13)]));
        f
    }

    #[test]
    fn test_adjacency() {
        let cfg = Cfg::new(&diamond());
        assert_eq!(cfg.entry(), Some(10));
        assert_eq!(cfg.successors(10), &[11, 12]);
        assert_eq!(cfg.predecessors(13), &[11, 12, 14]);
        assert!(cfg.predecessors(10).is_empty());
        assert_eq!(cfg.edges().len(), 5);
    }

    #[test]
    fn test_reachability() {
        let cfg = Cfg::new(&diamond());
        assert!(cfg.is_reachable(13));
        assert!(!cfg.is_reachable(14));
        let rpo = cfg.reverse_post_order();
        assert_eq!(rpo.first(), Some(&10));
        assert_eq!(rpo.last(), Some(&13));
        assert_eq!(rpo.len(), 4);
    }

    #[test]
    fn test_reachable_from_with_stop() {
        let cfg = Cfg::new(&diamond());
        let seen = cfg.reachable_from(10, Some(13));
        assert!(seen.contains(&11));
        assert!(!seen.contains(&13));
    }
}
