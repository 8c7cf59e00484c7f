//! Structured control flow analysis.
//!
//! Every block ending in a merge instruction heads a construct: a selection
//! (or switch) with a merge block, or a loop with a merge block and a
//! continue target. This module recovers, for each block, the innermost
//! construct, loop and switch that contain it and whether it lies inside a
//! loop's continue construct, and classifies edges as structured exits,
//! internal edges or back edges.
//!
//! Blocks are visited in "structured order": a reverse post-order in which a
//! header's merge block and continue target are treated as extra
//! successors, so that a construct's body is always visited before its
//! continue construct, which is visited before its merge block.

use crate::cfg::{self, Cfg};
use crate::dominators::DominatorTree;
use crate::instruction::{Id, Opcode};
use crate::module::Function;
use spvfuzz_core::{Error, Result};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructKind {
    Selection,
    Switch,
    Loop { continue_target: Id },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Construct {
    pub header: Id,
    pub kind: ConstructKind,
    pub merge: Id,
}

impl Construct {
    pub fn is_loop(&self) -> bool {
        matches!(self.kind, ConstructKind::Loop { .. })
    }

    pub fn continue_target(&self) -> Option<Id> {
        match self.kind {
            ConstructKind::Loop { continue_target } => Some(continue_target),
            _ => None,
        }
    }
}

/// Where a block sits in the construct nesting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    /// Header of the innermost construct strictly containing the block
    pub containing_construct: Option<Id>,
    pub containing_loop: Option<Id>,
    pub containing_switch: Option<Id>,
    pub in_continue: bool,
}

#[derive(Debug, Clone)]
struct TraversalState {
    merge: Option<Id>,
    continue_node: Option<Id>,
    info: Placement,
}

#[derive(Debug, Clone)]
pub struct StructuredCfg {
    constructs: HashMap<Id, Construct>,
    placement: HashMap<Id, Placement>,
    merge_to_header: HashMap<Id, Id>,
    continue_to_header: HashMap<Id, Id>,
    back_edges: HashSet<(Id, Id)>,
}

fn unsupported(function: &Function, reason: impl std::fmt::Display) -> Error {
    Error::Unsupported(format!("function {}: {}", function.id(), reason))
}

impl StructuredCfg {
    /// Analyze a function. Fails with `Error::Unsupported` when merge blocks
    /// or continue targets cannot be determined uniquely, or when the
    /// control flow is irreducible.
    pub fn analyze(function: &Function, cfg: &Cfg, dom: &DominatorTree) -> Result<Self> {
        let mut constructs = HashMap::new();
        let mut merge_to_header = HashMap::new();
        let mut continue_to_header = HashMap::new();

        for block in &function.blocks {
            let Some(merge_inst) = block.merge_instruction() else {
                continue;
            };
            let merge = merge_inst
                .merge_target()
                .ok_or_else(|| unsupported(function, "merge instruction without a target"))?;
            if !cfg.contains(merge) {
                return Err(unsupported(function, format!("merge block {merge} is not in the function")));
            }
            if merge == block.id {
                return Err(unsupported(function, format!("block {merge} is its own merge block")));
            }
            let kind = if merge_inst.opcode == Opcode::LoopMerge {
                let continue_target = merge_inst.continue_target().ok_or_else(|| {
                    unsupported(function, "loop merge without a continue target")
                })?;
                if !cfg.contains(continue_target) {
                    return Err(unsupported(
                        function,
                        format!("continue target {continue_target} is not in the function"),
                    ));
                }
                if continue_target == merge {
                    return Err(unsupported(
                        function,
                        format!("loop {} uses {merge} as both merge and continue target", block.id),
                    ));
                }
                if continue_to_header.insert(continue_target, block.id).is_some() {
                    return Err(unsupported(
                        function,
                        format!("block {continue_target} continues two loops"),
                    ));
                }
                ConstructKind::Loop { continue_target }
            } else if block.terminator().map(|t| t.opcode) == Some(Opcode::Switch) {
                ConstructKind::Switch
            } else {
                ConstructKind::Selection
            };
            if merge_to_header.insert(merge, block.id).is_some() {
                return Err(unsupported(function, format!("block {merge} merges two constructs")));
            }
            constructs.insert(
                block.id,
                Construct {
                    header: block.id,
                    kind,
                    merge,
                },
            );
        }

        let mut back_edges = HashSet::new();
        for (from, to) in cfg.edges() {
            let (Some(fi), Some(ti)) = (dom.rpo_index(from), dom.rpo_index(to)) else {
                continue;
            };
            if ti > fi {
                continue;
            }
            if !dom.dominates(to, from) {
                return Err(unsupported(function, format!("irreducible edge {from} -> {to}")));
            }
            match constructs.get(&to) {
                Some(c) if c.is_loop() => {
                    back_edges.insert((from, to));
                }
                _ => {
                    return Err(unsupported(
                        function,
                        format!("back edge {from} -> {to} targets a block that is not a loop header"),
                    ))
                }
            }
        }

        for construct in constructs.values() {
            if let Some(continue_target) = construct.continue_target() {
                if dom.is_reachable(continue_target) && !dom.dominates(construct.header, continue_target) {
                    return Err(unsupported(
                        function,
                        format!(
                            "loop header {} does not dominate its continue target {continue_target}",
                            construct.header
                        ),
                    ));
                }
            }
        }

        let placement = match cfg.entry() {
            Some(entry) => place_blocks(entry, cfg, &constructs),
            None => HashMap::new(),
        };

        Ok(Self {
            constructs,
            placement,
            merge_to_header,
            continue_to_header,
            back_edges,
        })
    }

    pub fn construct(&self, header: Id) -> Option<&Construct> {
        self.constructs.get(&header)
    }

    pub fn constructs(&self) -> impl Iterator<Item = &Construct> {
        self.constructs.values()
    }

    pub fn placement(&self, block: Id) -> Option<&Placement> {
        self.placement.get(&block)
    }

    pub fn containing_construct(&self, block: Id) -> Option<Id> {
        self.placement(block).and_then(|p| p.containing_construct)
    }

    pub fn containing_loop(&self, block: Id) -> Option<Id> {
        self.placement(block).and_then(|p| p.containing_loop)
    }

    pub fn is_in_continue_construct(&self, block: Id) -> bool {
        self.placement(block).map_or(false, |p| p.in_continue)
    }

    pub fn is_header(&self, block: Id) -> bool {
        self.constructs.contains_key(&block)
    }

    pub fn is_loop_header(&self, block: Id) -> bool {
        self.construct(block).map_or(false, Construct::is_loop)
    }

    pub fn merge_block(&self, header: Id) -> Option<Id> {
        self.construct(header).map(|c| c.merge)
    }

    pub fn continue_target(&self, header: Id) -> Option<Id> {
        self.construct(header).and_then(Construct::continue_target)
    }

    pub fn is_merge_block(&self, block: Id) -> bool {
        self.merge_to_header.contains_key(&block)
    }

    pub fn header_of_merge(&self, block: Id) -> Option<Id> {
        self.merge_to_header.get(&block).copied()
    }

    pub fn is_continue_target(&self, block: Id) -> bool {
        self.continue_to_header.contains_key(&block)
    }

    pub fn loop_of_continue(&self, block: Id) -> Option<Id> {
        self.continue_to_header.get(&block).copied()
    }

    pub fn back_edges(&self) -> &HashSet<(Id, Id)> {
        &self.back_edges
    }

    pub fn is_back_edge(&self, from: Id, to: Id) -> bool {
        self.back_edges.contains(&(from, to))
    }

    /// The construct whose exits govern `block`'s outgoing edges: the
    /// construct it heads, otherwise the innermost one containing it
    pub fn exit_construct(&self, block: Id) -> Option<Id> {
        if self.is_header(block) {
            Some(block)
        } else {
            self.containing_construct(block)
        }
    }

    /// Innermost loop a `break` or `continue` from `block` would leave
    pub fn innermost_loop(&self, block: Id) -> Option<Id> {
        if self.is_loop_header(block) {
            Some(block)
        } else {
            self.containing_loop(block)
        }
    }

    pub fn innermost_switch(&self, block: Id) -> Option<Id> {
        match self.construct(block) {
            Some(Construct {
                kind: ConstructKind::Switch,
                ..
            }) => Some(block),
            _ => self.placement(block).and_then(|p| p.containing_switch),
        }
    }

    /// Whether the edges leaving `block` originate inside a continue construct
    pub fn exit_in_continue(&self, block: Id) -> bool {
        match self.construct(block) {
            Some(Construct {
                kind: ConstructKind::Loop { continue_target },
                ..
            }) => *continue_target == block,
            _ => self.is_in_continue_construct(block),
        }
    }

    /// Whether `from -> to` is a back edge leaving the continue construct of
    /// the loop it targets
    pub fn back_edge_is_legal(&self, from: Id, to: Id) -> bool {
        let Some(continue_target) = self.continue_target(to) else {
            return false;
        };
        from == continue_target
            || (self.is_in_continue_construct(from) && self.containing_loop(from) == Some(to))
    }

    /// Whether `from -> to` leaves a construct in a structured way: to the
    /// merge of its own construct, a break to the innermost loop or switch
    /// merge, a continue, or a legal back edge
    pub fn is_structured_exit(&self, from: Id, to: Id) -> bool {
        if self.is_back_edge(from, to) {
            return self.back_edge_is_legal(from, to);
        }
        if self.exit_construct(from).and_then(|h| self.merge_block(h)) == Some(to) {
            return true;
        }
        let innermost_loop = self.innermost_loop(from);
        if innermost_loop.and_then(|h| self.merge_block(h)) == Some(to) {
            return true;
        }
        if innermost_loop.and_then(|h| self.continue_target(h)) == Some(to) {
            return true;
        }
        self.innermost_switch(from).and_then(|h| self.merge_block(h)) == Some(to)
    }

    /// Whether `from -> to` stays inside the construct governing `from`'s
    /// exits. Edges touching blocks outside the structured order are not
    /// judged here.
    pub fn is_internal_edge(&self, from: Id, to: Id) -> bool {
        let Some(target) = self.placement(to) else {
            return true;
        };
        if self.placement(from).is_none() {
            return true;
        }
        target.containing_construct == self.exit_construct(from)
            && target.in_continue == self.exit_in_continue(from)
    }

    pub fn edge_is_structured(&self, from: Id, to: Id) -> bool {
        self.is_structured_exit(from, to) || self.is_internal_edge(from, to)
    }
}

fn structured_successors(block: Id, cfg: &Cfg, constructs: &HashMap<Id, Construct>) -> Vec<Id> {
    let mut succs = Vec::new();
    if let Some(c) = constructs.get(&block) {
        succs.push(c.merge);
        if let Some(continue_target) = c.continue_target() {
            succs.push(continue_target);
        }
    }
    succs.extend(cfg.successors(block).iter().copied());
    succs
}

fn place_blocks(entry: Id, cfg: &Cfg, constructs: &HashMap<Id, Construct>) -> HashMap<Id, Placement> {
    let order = cfg::reverse_post_order(entry, |b| structured_successors(b, cfg, constructs));
    let mut placement = HashMap::new();
    let mut stack = vec![TraversalState {
        merge: None,
        continue_node: None,
        info: Placement::default(),
    }];

    for block in order {
        while stack.len() > 1 && stack.last().map_or(false, |s| s.merge == Some(block)) {
            stack.pop();
        }
        let Some(top) = stack.last().cloned() else {
            break;
        };
        let mut info = top.info.clone();
        let mut continue_node = top.continue_node;

        if top.continue_node == Some(block) {
            // Entering the continue construct of the innermost loop
            let loop_header = top.info.containing_loop;
            let loop_merge = loop_header.and_then(|h| constructs.get(&h)).map(|c| c.merge);
            info = Placement {
                containing_construct: loop_header,
                containing_loop: loop_header,
                containing_switch: None,
                in_continue: true,
            };
            continue_node = None;
            stack.push(TraversalState {
                merge: loop_merge,
                continue_node,
                info: info.clone(),
            });
        }

        let mut own = info.clone();
        if let Some(construct) = constructs.get(&block) {
            let inner = match construct.kind {
                ConstructKind::Loop { continue_target } => {
                    if continue_target == block {
                        own.in_continue = true;
                    }
                    Placement {
                        containing_construct: Some(block),
                        containing_loop: Some(block),
                        containing_switch: None,
                        in_continue: continue_target == block,
                    }
                }
                ConstructKind::Selection => Placement {
                    containing_construct: Some(block),
                    ..info.clone()
                },
                ConstructKind::Switch => Placement {
                    containing_construct: Some(block),
                    containing_switch: Some(block),
                    ..info.clone()
                },
            };
            let inner_continue = construct.continue_target().or(continue_node);
            stack.push(TraversalState {
                merge: Some(construct.merge),
                continue_node: inner_continue,
                info: inner,
            });
        }
        placement.insert(block, own);
    }

    placement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::module::BasicBlock;

    fn block(id: Id, inst: Vec<Instruction>) -> BasicBlock {
        BasicBlock::with_instructions(id, inst)
    }

    fn analyze(f: &Function) -> Result<StructuredCfg> {
        let cfg = Cfg::new(f);
        let dom = DominatorTree::compute(&cfg);
        StructuredCfg::analyze(f, &cfg, &dom)
    }

    /// 10 -> loop 11 { 12: selection { 13 } merge 14 } continue 15, merge 16
    fn nested() -> Function {
        let mut f = Function::new(1, 2, 3);
        f.add_block(block(10, vec![Instruction::branch(11)]));
        f.add_block(block(
            11,
            vec![
                Instruction::loop_merge(16, 15),
                Instruction::branch_conditional(4, 12, 16),
            ],
        ));
        f.add_block(block(
            12,
            vec![
                Instruction::selection_merge(14),
                Instruction::branch_conditional(4, 13, 14),
            ],
        ));
        f.add_block(block(13, vec![Instruction::branch(14)]));
        f.add_block(block(14, vec![Instruction::branch(15)]));
        f.add_block(block(15, vec![Instruction::branch(11)]));
        f.add_block(block(16, vec![Instruction::return_void()]));
        f
    }

    #[test]
    fn test_constructs() {
        let s = analyze(&nested()).unwrap();
        assert_eq!(s.merge_block(11), Some(16));
        assert_eq!(s.continue_target(11), Some(15));
        assert_eq!(s.merge_block(12), Some(14));
        assert_eq!(s.construct(12).map(|c| c.kind), Some(ConstructKind::Selection));
        assert!(s.is_merge_block(14));
        assert_eq!(s.header_of_merge(16), Some(11));
        assert_eq!(s.loop_of_continue(15), Some(11));
        assert!(s.is_back_edge(15, 11));
    }

    #[test]
    fn test_placement() {
        let s = analyze(&nested()).unwrap();
        assert_eq!(s.containing_construct(11), None);
        assert_eq!(s.containing_construct(12), Some(11));
        assert_eq!(s.containing_construct(13), Some(12));
        assert_eq!(s.containing_loop(13), Some(11));
        assert_eq!(s.containing_construct(14), Some(11));
        assert!(s.is_in_continue_construct(15));
        assert!(!s.is_in_continue_construct(14));
        assert_eq!(s.containing_construct(16), None);
        assert_eq!(s.containing_loop(16), None);
    }

    #[test]
    fn test_edge_classification() {
        let s = analyze(&nested()).unwrap();
        // Break from inside the selection to the loop merge
        assert!(s.is_structured_exit(13, 16));
        // Continue from inside the selection
        assert!(s.is_structured_exit(13, 15));
        // Leaving the selection through its merge
        assert!(s.is_structured_exit(13, 14));
        assert!(s.is_internal_edge(11, 12));
        assert!(!s.is_internal_edge(13, 16));
        assert!(s.back_edge_is_legal(15, 11));
        assert!(s.edge_is_structured(14, 15));
    }

    #[test]
    fn test_back_edge_into_non_header_is_unsupported() {
        let mut f = Function::new(1, 2, 3);
        f.add_block(block(10, vec![Instruction::branch(11)]));
        f.add_block(block(11, vec![Instruction::branch(12)]));
        f.add_block(block(12, vec![Instruction::branch_conditional(4, 11, 13)]));
        f.add_block(block(13, vec![Instruction::return_void()]));
        assert!(matches!(analyze(&f), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_shared_merge_is_unsupported() {
        let mut f = Function::new(1, 2, 3);
        f.add_block(block(
            10,
            vec![
                Instruction::selection_merge(13),
                Instruction::branch_conditional(4, 11, 13),
            ],
        ));
        f.add_block(block(
            11,
            vec![
                Instruction::selection_merge(13),
                Instruction::branch_conditional(4, 12, 13),
            ],
        ));
        f.add_block(block(12, vec![Instruction::branch(13)]));
        f.add_block(block(13, vec![Instruction::return_void()]));
        assert!(analyze(&f).is_err());
    }

    #[test]
    fn test_irreducible_is_unsupported() {
        let mut f = Function::new(1, 2, 3);
        f.add_block(block(
            10,
            vec![
                Instruction::selection_merge(13),
                Instruction::branch_conditional(4, 11, 12),
            ],
        ));
        f.add_block(block(11, vec![Instruction::branch_conditional(4, 12, 13)]));
        f.add_block(block(12, vec![Instruction::branch_conditional(4, 11, 13)]));
        f.add_block(block(13, vec![Instruction::return_void()]));
        assert!(matches!(analyze(&f), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_single_block_loop() {
        let mut f = Function::new(1, 2, 3);
        f.add_block(block(10, vec![Instruction::branch(11)]));
        f.add_block(block(
            11,
            vec![
                Instruction::loop_merge(12, 11),
                Instruction::branch_conditional(4, 11, 12),
            ],
        ));
        f.add_block(block(12, vec![Instruction::return_void()]));
        let s = analyze(&f).unwrap();
        assert!(s.is_back_edge(11, 11));
        assert!(s.back_edge_is_legal(11, 11));
        assert!(s.is_in_continue_construct(11));
        assert!(s.is_structured_exit(11, 12));
    }
}
