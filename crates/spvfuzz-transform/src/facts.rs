//! Fact ledger: knowledge about the module that transformations establish
//! and later transformations rely on.
//!
//! The ledger is append-only. Every accepted fact gets a version stamp (its
//! position in the log) and nothing is ever retracted, so a fact observed by
//! `is_applicable` still holds when `apply` runs.

use serde::{Deserialize, Serialize};
use spvfuzz_ir::{Id, Opcode};
use std::collections::{BTreeSet, HashMap, HashSet};

/// An id plus a path of composite indices naming a sub-value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataDescriptor {
    pub object: Id,
    pub index: Vec<u32>,
}

impl DataDescriptor {
    pub fn new(object: Id, index: Vec<u32>) -> Self {
        Self { object, index }
    }

    /// The whole value of `object`
    pub fn id(object: Id) -> Self {
        Self {
            object,
            index: Vec::new(),
        }
    }

    pub fn is_whole_id(&self) -> bool {
        self.index.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fact {
    /// The block is never executed
    DeadBlock { block: Id },
    /// The value of the id never influences the module's observable behavior
    IrrelevantId { id: Id },
    /// The value stored behind the pointer never influences behavior
    PointeeValueIsIrrelevant { pointer: Id },
    /// The two data descriptors always hold equal values
    Synonym {
        first: DataDescriptor,
        second: DataDescriptor,
    },
    /// `result = opcode(operands)`
    IdEquation {
        result: Id,
        opcode: Opcode,
        operands: Vec<Id>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Equation {
    opcode: Opcode,
    operands: Vec<Id>,
}

#[derive(Debug, Clone, Default)]
pub struct FactLedger {
    log: Vec<Fact>,
    dead_blocks: HashSet<Id>,
    irrelevant_ids: HashSet<Id>,
    irrelevant_pointees: HashSet<Id>,
    classes: Vec<BTreeSet<DataDescriptor>>,
    class_of: HashMap<DataDescriptor, usize>,
    equations: HashMap<Id, Vec<Equation>>,
}

impl FactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of facts accepted so far; a fact's version is its position
    pub fn version(&self) -> usize {
        self.log.len()
    }

    /// Every accepted fact, in acceptance order
    pub fn facts(&self) -> &[Fact] {
        &self.log
    }

    /// Record a fact. Returns its version stamp, or `None` if the ledger
    /// already knew it.
    pub fn add(&mut self, fact: Fact) -> Option<usize> {
        let added = match &fact {
            Fact::DeadBlock { block } => self.dead_blocks.insert(*block),
            Fact::IrrelevantId { id } => self.irrelevant_ids.insert(*id),
            Fact::PointeeValueIsIrrelevant { pointer } => self.irrelevant_pointees.insert(*pointer),
            Fact::Synonym { first, second } => self.merge_classes(first.clone(), second.clone()),
            Fact::IdEquation {
                result,
                opcode,
                operands,
            } => self.record_equation(*result, *opcode, operands.clone()),
        };
        if !added {
            return None;
        }
        let version = self.log.len();
        tracing::trace!(version, ?fact, "fact recorded");
        self.log.push(fact);
        Some(version)
    }

    pub fn add_dead_block(&mut self, block: Id) {
        self.add(Fact::DeadBlock { block });
    }

    pub fn add_irrelevant_id(&mut self, id: Id) {
        self.add(Fact::IrrelevantId { id });
    }

    pub fn add_irrelevant_pointee(&mut self, pointer: Id) {
        self.add(Fact::PointeeValueIsIrrelevant { pointer });
    }

    pub fn add_synonym(&mut self, first: DataDescriptor, second: DataDescriptor) {
        self.add(Fact::Synonym { first, second });
    }

    /// Record `result = opcode(operands)` and every synonym it implies
    pub fn add_id_equation(&mut self, result: Id, opcode: Opcode, operands: Vec<Id>) {
        let derived = self.derive_synonyms(result, opcode, &operands);
        self.add(Fact::IdEquation {
            result,
            opcode,
            operands,
        });
        for other in derived {
            self.add_synonym(DataDescriptor::id(result), DataDescriptor::id(other));
        }
    }

    pub fn is_block_dead(&self, block: Id) -> bool {
        self.dead_blocks.contains(&block)
    }

    pub fn is_id_irrelevant(&self, id: Id) -> bool {
        self.irrelevant_ids.contains(&id)
    }

    pub fn pointee_value_is_irrelevant(&self, pointer: Id) -> bool {
        self.irrelevant_pointees.contains(&pointer)
    }

    pub fn dead_blocks(&self) -> impl Iterator<Item = Id> + '_ {
        self.dead_blocks.iter().copied()
    }

    pub fn irrelevant_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.irrelevant_ids.iter().copied()
    }

    pub fn are_synonymous(&self, a: &DataDescriptor, b: &DataDescriptor) -> bool {
        if a == b {
            return true;
        }
        match (self.class_of.get(a), self.class_of.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Every descriptor known to be synonymous with `desc`, excluding itself
    pub fn synonyms_of(&self, desc: &DataDescriptor) -> Vec<DataDescriptor> {
        self.class_of
            .get(desc)
            .and_then(|class| self.classes.get(*class))
            .map(|members| members.iter().filter(|m| *m != desc).cloned().collect())
            .unwrap_or_default()
    }

    /// Whole ids synonymous with the whole value of `id`, excluding `id`
    pub fn id_synonyms_of(&self, id: Id) -> Vec<Id> {
        self.synonyms_of(&DataDescriptor::id(id))
            .into_iter()
            .filter(DataDescriptor::is_whole_id)
            .map(|d| d.object)
            .collect()
    }

    fn merge_classes(&mut self, a: DataDescriptor, b: DataDescriptor) -> bool {
        if self.are_synonymous(&a, &b) {
            return false;
        }
        let ca = self.class_index(a);
        let cb = self.class_index(b);
        let (keep, drop) = if self.classes[ca].len() >= self.classes[cb].len() {
            (ca, cb)
        } else {
            (cb, ca)
        };
        let moved = std::mem::take(&mut self.classes[drop]);
        for member in &moved {
            self.class_of.insert(member.clone(), keep);
        }
        self.classes[keep].extend(moved);
        true
    }

    fn class_index(&mut self, desc: DataDescriptor) -> usize {
        if let Some(index) = self.class_of.get(&desc) {
            return *index;
        }
        let index = self.classes.len();
        self.classes.push(BTreeSet::from([desc.clone()]));
        self.class_of.insert(desc, index);
        index
    }

    fn record_equation(&mut self, result: Id, opcode: Opcode, operands: Vec<Id>) -> bool {
        let equation = Equation { opcode, operands };
        let known = self.equations.entry(result).or_default();
        if known.contains(&equation) {
            return false;
        }
        known.push(equation);
        true
    }

    /// Ids synonymous with `id`, including `id` itself
    fn class_ids(&self, id: Id) -> Vec<Id> {
        let mut ids = vec![id];
        ids.extend(self.id_synonyms_of(id));
        ids
    }

    fn ids_synonymous(&self, a: Id, b: Id) -> bool {
        self.are_synonymous(&DataDescriptor::id(a), &DataDescriptor::id(b))
    }

    /// Equations known for `id` or any of its synonyms
    fn equations_of(&self, id: Id) -> Vec<&Equation> {
        self.class_ids(id)
            .into_iter()
            .filter_map(|x| self.equations.get(&x))
            .flatten()
            .collect()
    }

    /// Ids that `result = opcode(operands)` proves equal to `result`
    fn derive_synonyms(&self, result: Id, opcode: Opcode, operands: &[Id]) -> Vec<Id> {
        let mut derived = Vec::new();
        match (opcode, operands) {
            (Opcode::CopyObject, [a]) => derived.push(*a),
            (Opcode::LogicalNot, [a]) | (Opcode::SNegate, [a]) => {
                // Double negation
                for eq in self.equations_of(*a) {
                    if let (true, [inner]) = (eq.opcode == opcode, eq.operands.as_slice()) {
                        derived.push(*inner);
                    }
                }
            }
            (Opcode::IAdd, [a, b]) => {
                // (c - b) + b and a + (c - a)
                for (x, y) in [(*a, *b), (*b, *a)] {
                    for eq in self.equations_of(x) {
                        if let (Opcode::ISub, [c, d]) = (eq.opcode, eq.operands.as_slice()) {
                            if self.ids_synonymous(*d, y) {
                                derived.push(*c);
                            }
                        }
                    }
                }
            }
            (Opcode::ISub, [a, b]) => {
                // (c + d) - d and (c + d) - c
                for eq in self.equations_of(*a) {
                    if let (Opcode::IAdd, [c, d]) = (eq.opcode, eq.operands.as_slice()) {
                        if self.ids_synonymous(*d, *b) {
                            derived.push(*c);
                        } else if self.ids_synonymous(*c, *b) {
                            derived.push(*d);
                        }
                    }
                }
            }
            _ => {}
        }
        derived.retain(|id| *id != result);
        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dead_blocks_are_monotonic() {
        let mut facts = FactLedger::new();
        assert!(!facts.is_block_dead(10));
        assert_eq!(facts.add(Fact::DeadBlock { block: 10 }), Some(0));
        assert_eq!(facts.add(Fact::DeadBlock { block: 10 }), None);
        facts.add_irrelevant_id(11);
        assert!(facts.is_block_dead(10));
        assert_eq!(facts.version(), 2);
    }

    #[test]
    fn test_synonym_classes() {
        let mut facts = FactLedger::new();
        facts.add_synonym(DataDescriptor::id(1), DataDescriptor::id(2));
        facts.add_synonym(DataDescriptor::id(3), DataDescriptor::id(4));
        assert!(!facts.are_synonymous(&DataDescriptor::id(1), &DataDescriptor::id(4)));

        facts.add_synonym(DataDescriptor::id(2), DataDescriptor::id(3));
        assert!(facts.are_synonymous(&DataDescriptor::id(1), &DataDescriptor::id(4)));
        let mut synonyms = facts.id_synonyms_of(1);
        synonyms.sort_unstable();
        assert_eq!(synonyms, vec![2, 3, 4]);
    }

    #[test]
    fn test_sub_value_descriptors() {
        let mut facts = FactLedger::new();
        facts.add_synonym(DataDescriptor::new(5, vec![1]), DataDescriptor::id(6));
        assert!(facts.id_synonyms_of(6).is_empty());
        assert_eq!(facts.synonyms_of(&DataDescriptor::id(6)), vec![DataDescriptor::new(5, vec![1])]);
    }

    #[test]
    fn test_double_negation_equation() {
        let mut facts = FactLedger::new();
        facts.add_id_equation(20, Opcode::LogicalNot, vec![10]);
        facts.add_id_equation(21, Opcode::LogicalNot, vec![20]);
        assert!(facts.are_synonymous(&DataDescriptor::id(21), &DataDescriptor::id(10)));
        assert!(!facts.are_synonymous(&DataDescriptor::id(20), &DataDescriptor::id(10)));
    }

    #[test]
    fn test_add_sub_equations() {
        let mut facts = FactLedger::new();
        facts.add_id_equation(20, Opcode::ISub, vec![10, 11]);
        facts.add_id_equation(21, Opcode::IAdd, vec![20, 11]);
        assert!(facts.are_synonymous(&DataDescriptor::id(21), &DataDescriptor::id(10)));

        facts.add_id_equation(30, Opcode::IAdd, vec![12, 13]);
        facts.add_id_equation(31, Opcode::ISub, vec![30, 12]);
        assert!(facts.are_synonymous(&DataDescriptor::id(31), &DataDescriptor::id(13)));
    }

    #[test]
    fn test_copy_object_equation() {
        let mut facts = FactLedger::new();
        facts.add_id_equation(40, Opcode::CopyObject, vec![41]);
        assert_eq!(facts.id_synonyms_of(41), vec![40]);
    }

    proptest! {
        #[test]
        fn prop_synonymy_is_an_equivalence(pairs in proptest::collection::vec((0u32..12, 0u32..12), 0..20)) {
            let mut facts = FactLedger::new();
            for (a, b) in &pairs {
                facts.add_synonym(DataDescriptor::id(*a), DataDescriptor::id(*b));
            }
            for (a, b) in &pairs {
                let (da, db) = (DataDescriptor::id(*a), DataDescriptor::id(*b));
                prop_assert!(facts.are_synonymous(&da, &db));
                prop_assert!(facts.are_synonymous(&db, &da));
            }
            for x in 0u32..12 {
                for y in 0u32..12 {
                    for z in 0u32..12 {
                        let (dx, dy, dz) = (DataDescriptor::id(x), DataDescriptor::id(y), DataDescriptor::id(z));
                        if facts.are_synonymous(&dx, &dy) && facts.are_synonymous(&dy, &dz) {
                            prop_assert!(facts.are_synonymous(&dx, &dz));
                        }
                    }
                }
            }
        }

        #[test]
        fn prop_versions_only_grow(blocks in proptest::collection::vec(0u32..20, 0..30)) {
            let mut facts = FactLedger::new();
            let mut last = 0;
            for block in blocks {
                facts.add_dead_block(block);
                prop_assert!(facts.version() >= last);
                prop_assert!(facts.is_block_dead(block));
                last = facts.version();
            }
        }
    }
}
