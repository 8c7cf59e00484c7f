//! Memory-effect classification and reordering legality.

use crate::context::IrContext;
use crate::instruction::{Id, Instruction, MemoryOp, Opcode, OpcodeClass};
use std::collections::HashSet;

/// Abstract memory location named by a pointer.
///
/// `root` is the variable the pointer was derived from, when that can be
/// traced through access chains and copies. `path` is the constant index
/// path from the root, when every index is a known constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryLocation {
    pub pointer: Id,
    pub root: Option<Id>,
    pub path: Option<Vec<u32>>,
}

impl MemoryLocation {
    /// A location of unknown origin, which aliases everything
    pub fn unknown(pointer: Id) -> Self {
        Self {
            pointer,
            root: None,
            path: None,
        }
    }

    pub fn resolve(ctx: &IrContext, pointer: Id) -> Self {
        let mut segments: Vec<Option<Vec<u32>>> = Vec::new();
        let mut seen = HashSet::new();
        let mut current = pointer;
        loop {
            if !seen.insert(current) {
                return Self::unknown(pointer);
            }
            let Some(def) = ctx.get_def(current) else {
                return Self::unknown(pointer);
            };
            match def.opcode {
                Opcode::Variable => break,
                Opcode::CopyObject => match def.id_operand(0) {
                    Some(source) => current = source,
                    None => return Self::unknown(pointer),
                },
                Opcode::AccessChain | Opcode::InBoundsAccessChain => {
                    let Some(base) = def.id_operand(0) else {
                        return Self::unknown(pointer);
                    };
                    let indices: Option<Vec<u32>> = def
                        .id_operands()
                        .skip(1)
                        .map(|index| ctx.module().constant_literal(index))
                        .collect();
                    segments.push(indices);
                    current = base;
                }
                _ => return Self::unknown(pointer),
            }
        }

        // Segments were collected from the pointer back towards the root
        let path = segments
            .into_iter()
            .rev()
            .try_fold(Vec::new(), |mut path, segment| {
                path.extend(segment?);
                Some(path)
            });
        Self {
            pointer,
            root: Some(current),
            path,
        }
    }

    /// Whether the two locations might overlap
    pub fn may_alias(&self, other: &MemoryLocation) -> bool {
        if self.pointer == other.pointer {
            return true;
        }
        match (self.root, other.root) {
            (Some(a), Some(b)) if a != b => false,
            (Some(_), Some(_)) => match (&self.path, &other.path) {
                (Some(a), Some(b)) => a.starts_with(b) || b.starts_with(a),
                _ => true,
            },
            _ => true,
        }
    }

    /// Whether the two locations are provably the same
    pub fn must_alias(&self, other: &MemoryLocation) -> bool {
        if self.pointer == other.pointer {
            return true;
        }
        match (self.root, other.root, &self.path, &other.path) {
            (Some(a), Some(b), Some(pa), Some(pb)) => a == b && pa == pb,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryEffect {
    Pure,
    Read(MemoryLocation),
    Write(MemoryLocation),
    ReadWrite {
        reads: MemoryLocation,
        writes: MemoryLocation,
    },
    Barrier,
}

impl MemoryEffect {
    pub fn reads(&self) -> Option<&MemoryLocation> {
        match self {
            MemoryEffect::Read(loc) | MemoryEffect::ReadWrite { reads: loc, .. } => Some(loc),
            _ => None,
        }
    }

    pub fn writes(&self) -> Option<&MemoryLocation> {
        match self {
            MemoryEffect::Write(loc) | MemoryEffect::ReadWrite { writes: loc, .. } => Some(loc),
            _ => None,
        }
    }

    pub fn is_pure(&self) -> bool {
        matches!(self, MemoryEffect::Pure)
    }

    pub fn is_barrier(&self) -> bool {
        matches!(self, MemoryEffect::Barrier)
    }
}

/// Classify the memory behavior of an instruction
pub fn classify(ctx: &IrContext, inst: &Instruction) -> MemoryEffect {
    let location = |operand: usize| {
        inst.id_operand(operand)
            .map(|pointer| MemoryLocation::resolve(ctx, pointer))
    };
    match inst.opcode.class() {
        OpcodeClass::Memory(MemoryOp::Load) => location(0).map_or(MemoryEffect::Barrier, MemoryEffect::Read),
        OpcodeClass::Memory(MemoryOp::Store) => {
            location(0).map_or(MemoryEffect::Barrier, MemoryEffect::Write)
        }
        OpcodeClass::Memory(MemoryOp::CopyMemory) => match (location(1), location(0)) {
            (Some(reads), Some(writes)) => MemoryEffect::ReadWrite { reads, writes },
            _ => MemoryEffect::Barrier,
        },
        OpcodeClass::Memory(MemoryOp::Atomic) => match location(0) {
            Some(loc) => MemoryEffect::ReadWrite {
                reads: loc.clone(),
                writes: loc,
            },
            None => MemoryEffect::Barrier,
        },
        OpcodeClass::Memory(MemoryOp::Variable) | OpcodeClass::Memory(MemoryOp::AccessChain) => {
            MemoryEffect::Pure
        }
        OpcodeClass::Barrier | OpcodeClass::Call | OpcodeClass::Unmodeled => MemoryEffect::Barrier,
        _ => MemoryEffect::Pure,
    }
}

fn read_write_is_safe<F>(read: &MemoryLocation, write: &MemoryLocation, irrelevant: &F) -> bool
where
    F: Fn(&MemoryLocation) -> bool,
{
    !read.may_alias(write) || (irrelevant(write) && !read.must_alias(write))
}

fn write_write_is_safe<F>(a: &MemoryLocation, b: &MemoryLocation, irrelevant: &F) -> bool
where
    F: Fn(&MemoryLocation) -> bool,
{
    !a.may_alias(b) || (irrelevant(a) && irrelevant(b))
}

/// Whether two adjacent instructions with effects `a` and `b` may trade
/// places. `irrelevant` reports whether the value stored at a location may
/// be arbitrary.
pub fn can_swap<F>(a: &MemoryEffect, b: &MemoryEffect, irrelevant: F) -> bool
where
    F: Fn(&MemoryLocation) -> bool,
{
    if a.is_pure() || b.is_pure() {
        return true;
    }
    if a.is_barrier() || b.is_barrier() {
        return false;
    }
    for (first, second) in [(a, b), (b, a)] {
        let Some(write) = first.writes() else {
            continue;
        };
        if let Some(read) = second.reads() {
            if !read_write_is_safe(read, write, &irrelevant) {
                return false;
            }
        }
        if let Some(other_write) = second.writes() {
            if !write_write_is_safe(write, other_write, &irrelevant) {
                return false;
            }
        }
    }
    true
}
