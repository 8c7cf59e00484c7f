//! Module wrapper with cached derived analyses.
//!
//! `IrContext` owns the module. The def-use index and per-function
//! control-flow analyses are built lazily on first query and dropped as soon
//! as mutable access to the module is taken, so a stale analysis can never
//! be observed after a mutation.

use crate::cfg::Cfg;
use crate::dominators::DominatorTree;
use crate::instruction::{Id, Instruction};
use crate::module::{Function, Module};
use crate::structure::StructuredCfg;
use spvfuzz_core::{Error, Result};
use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

/// Where an id is defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefSite {
    Capability(usize),
    TypeOrValue(usize),
    Global(usize),
    Function(usize),
    Parameter { function: usize, index: usize },
    Label { function: usize, block: usize },
    Instruction { function: usize, block: usize, index: usize },
}

/// An instruction that uses an id, and which operand slot holds it.
/// `operand` is `None` when the id is the instruction's result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseSite {
    pub user: DefSite,
    pub operand: Option<usize>,
}

#[derive(Debug, Default)]
pub struct DefUseIndex {
    defs: HashMap<Id, DefSite>,
    uses: HashMap<Id, Vec<UseSite>>,
    duplicates: Vec<Id>,
}

impl DefUseIndex {
    pub fn build(module: &Module) -> Self {
        let mut index = Self::default();

        for (i, inst) in module.capabilities.iter().enumerate() {
            index.record(inst, DefSite::Capability(i));
        }
        for (i, inst) in module.types_and_values.iter().enumerate() {
            index.record(inst, DefSite::TypeOrValue(i));
        }
        for (i, inst) in module.globals.iter().enumerate() {
            index.record(inst, DefSite::Global(i));
        }
        for (fi, function) in module.functions.iter().enumerate() {
            index.record(&function.def, DefSite::Function(fi));
            for (pi, param) in function.params.iter().enumerate() {
                index.record(
                    param,
                    DefSite::Parameter {
                        function: fi,
                        index: pi,
                    },
                );
            }
            for (bi, block) in function.blocks.iter().enumerate() {
                index.define(
                    block.id,
                    DefSite::Label {
                        function: fi,
                        block: bi,
                    },
                );
                for (ii, inst) in block.instructions.iter().enumerate() {
                    index.record(
                        inst,
                        DefSite::Instruction {
                            function: fi,
                            block: bi,
                            index: ii,
                        },
                    );
                }
            }
        }
        index
    }

    fn define(&mut self, id: Id, site: DefSite) {
        if self.defs.insert(id, site).is_some() {
            self.duplicates.push(id);
        }
    }

    fn record(&mut self, inst: &Instruction, site: DefSite) {
        if let Some(id) = inst.result_id {
            self.define(id, site);
        }
        if let Some(ty) = inst.result_type {
            self.uses.entry(ty).or_default().push(UseSite {
                user: site,
                operand: None,
            });
        }
        for (i, operand) in inst.operands.iter().enumerate() {
            if let Some(id) = operand.as_id() {
                self.uses.entry(id).or_default().push(UseSite {
                    user: site,
                    operand: Some(i),
                });
            }
        }
    }

    pub fn def(&self, id: Id) -> Option<DefSite> {
        self.defs.get(&id).copied()
    }

    pub fn uses(&self, id: Id) -> &[UseSite] {
        self.uses.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids defined more than once
    pub fn duplicates(&self) -> &[Id] {
        &self.duplicates
    }

    pub fn defined_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.defs.keys().copied()
    }
}

/// Control-flow analyses of one function
#[derive(Debug)]
pub struct FunctionAnalysis {
    pub cfg: Cfg,
    pub dominators: DominatorTree,
    structure: Result<StructuredCfg>,
}

impl FunctionAnalysis {
    pub fn new(function: &Function) -> Self {
        let cfg = Cfg::new(function);
        let dominators = DominatorTree::compute(&cfg);
        let structure = StructuredCfg::analyze(function, &cfg, &dominators);
        Self {
            cfg,
            dominators,
            structure,
        }
    }

    /// Structured analysis, or `None` when the function's control flow is
    /// not supported
    pub fn structure(&self) -> Option<&StructuredCfg> {
        self.structure.as_ref().ok()
    }

    pub fn structure_result(&self) -> std::result::Result<&StructuredCfg, &Error> {
        self.structure.as_ref()
    }
}

#[derive(Debug)]
pub struct IrContext {
    module: Module,
    def_use: OnceCell<DefUseIndex>,
    analyses: RefCell<HashMap<Id, Arc<FunctionAnalysis>>>,
}

impl Clone for IrContext {
    fn clone(&self) -> Self {
        Self::new(self.module.clone())
    }
}

impl IrContext {
    pub fn new(module: Module) -> Self {
        Self {
            module,
            def_use: OnceCell::new(),
            analyses: RefCell::new(HashMap::new()),
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Mutable access to the module. Drops every cached analysis.
    pub fn module_mut(&mut self) -> &mut Module {
        self.invalidate();
        &mut self.module
    }

    pub fn into_module(self) -> Module {
        self.module
    }

    pub fn invalidate(&mut self) {
        self.def_use = OnceCell::new();
        self.analyses.get_mut().clear();
    }

    pub fn def_use(&self) -> &DefUseIndex {
        self.def_use.get_or_init(|| DefUseIndex::build(&self.module))
    }

    pub fn def_site(&self, id: Id) -> Option<DefSite> {
        self.def_use().def(id)
    }

    pub fn is_defined(&self, id: Id) -> bool {
        self.def_site(id).is_some()
    }

    pub fn uses(&self, id: Id) -> &[UseSite] {
        self.def_use().uses(id)
    }

    /// Instruction at a def or use site. Labels have no instruction.
    pub fn instruction_at(&self, site: DefSite) -> Option<&Instruction> {
        let m = &self.module;
        match site {
            DefSite::Capability(i) => m.capabilities.get(i),
            DefSite::TypeOrValue(i) => m.types_and_values.get(i),
            DefSite::Global(i) => m.globals.get(i),
            DefSite::Function(f) => m.functions.get(f).map(|f| &f.def),
            DefSite::Parameter { function, index } => {
                m.functions.get(function).and_then(|f| f.params.get(index))
            }
            DefSite::Label { .. } => None,
            DefSite::Instruction {
                function,
                block,
                index,
            } => m
                .functions
                .get(function)
                .and_then(|f| f.blocks.get(block))
                .and_then(|b| b.instructions.get(index)),
        }
    }

    /// Defining instruction of `id`
    pub fn get_def(&self, id: Id) -> Option<&Instruction> {
        self.def_site(id).and_then(|site| self.instruction_at(site))
    }

    pub fn type_of(&self, id: Id) -> Option<Id> {
        self.get_def(id).and_then(|inst| inst.result_type)
    }

    pub fn is_label(&self, id: Id) -> bool {
        matches!(self.def_site(id), Some(DefSite::Label { .. }))
    }

    /// `(function id, block label)` of an id defined inside a block
    pub fn enclosing_block(&self, id: Id) -> Option<(Id, Id)> {
        match self.def_site(id)? {
            DefSite::Instruction { function, block, .. } | DefSite::Label { function, block } => {
                let f = self.module.functions.get(function)?;
                Some((f.id(), f.blocks.get(block)?.id))
            }
            _ => None,
        }
    }

    /// Label of the block holding an instruction site
    pub fn block_of(&self, site: DefSite) -> Option<Id> {
        match site {
            DefSite::Instruction { function, block, .. } | DefSite::Label { function, block } => {
                Some(self.module.functions.get(function)?.blocks.get(block)?.id)
            }
            _ => None,
        }
    }

    /// Function containing the block labelled `block`
    pub fn function_of_block(&self, block: Id) -> Option<Id> {
        match self.def_site(block)? {
            DefSite::Label { function, .. } => self.module.functions.get(function).map(Function::id),
            _ => None,
        }
    }

    /// Cached analyses of a function
    pub fn analysis(&self, function: Id) -> Option<Arc<FunctionAnalysis>> {
        if let Some(found) = self.analyses.borrow().get(&function) {
            return Some(Arc::clone(found));
        }
        let analysis = Arc::new(FunctionAnalysis::new(self.module.function(function)?));
        self.analyses
            .borrow_mut()
            .insert(function, Arc::clone(&analysis));
        Some(analysis)
    }

    /// Analyses of the function containing `block`
    pub fn analysis_for_block(&self, block: Id) -> Option<Arc<FunctionAnalysis>> {
        self.analysis(self.function_of_block(block)?)
    }

    /// Whether the value `id` may be used by an instruction placed at
    /// `index` in `block` (before the instruction currently there).
    pub fn is_available_before(&self, id: Id, block: Id, index: usize) -> bool {
        let Some(site) = self.def_site(id) else {
            return false;
        };
        let Some(function) = self.function_of_block(block) else {
            return false;
        };
        match site {
            DefSite::TypeOrValue(_) | DefSite::Global(_) | DefSite::Function(_) => true,
            DefSite::Capability(_) | DefSite::Label { .. } => false,
            DefSite::Parameter { function: fi, .. } => {
                self.module.functions.get(fi).map(Function::id) == Some(function)
            }
            DefSite::Instruction {
                function: fi,
                block: bi,
                index: ii,
            } => {
                let Some(def_function) = self.module.functions.get(fi) else {
                    return false;
                };
                if def_function.id() != function {
                    return false;
                }
                let Some(def_block) = def_function.blocks.get(bi).map(|b| b.id) else {
                    return false;
                };
                if def_block == block {
                    return ii < index;
                }
                self.analysis(function)
                    .map_or(false, |a| a.dominators.strictly_dominates(def_block, block))
            }
        }
    }

    /// Whether `id` is available at the end of `block`, as required of a phi
    /// operand flowing in from `block`
    pub fn is_available_at_end(&self, id: Id, block: Id) -> bool {
        let len = self.module.block(block).map_or(0, |b| b.len());
        self.is_available_before(id, block, len)
    }
}
