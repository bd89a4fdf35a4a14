//! The assembler's output / the linker's input: one assembled unit.
//!
//! A [`Module`] is produced wholesale by [`crate::front::parse::assemble`]
//! and consumed by [`crate::back::link::Linker`], which copies its code
//! buffer into a [`crate::middle::vm::Segment`] and frees the rest.

/// A single exported label: `(name, code-buffer offset)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub location: u32,
}

/// An unresolved reference to another module's exported symbol.
///
/// `slots` lists every `(seg_slot, loc_slot)` pair of code-word offsets
/// that must receive the provider's segment id and the symbol's location
/// once the linker resolves `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub name: String,
    pub slots: Vec<(u32, u32)>,
}

/// An unresolved reference to a host-provided hatch.
///
/// `locations` lists every code-word offset that must receive the hatch's
/// assigned id once the linker resolves `name` among the registered hatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HatchReference {
    pub name: String,
    pub locations: Vec<u32>,
}

/// In-memory representation of one assembled unit.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// The code buffer: both instruction words and `.data` payloads.
    pub segment: Vec<u32>,
    pub symbols: Vec<Symbol>,
    pub relocations: Vec<Relocation>,
    pub hatch_references: Vec<HatchReference>,
    pub has_entry: bool,
    pub entry: u32,
}

impl Module {
    pub fn find_symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    pub fn find_symbol_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.symbols.iter_mut().find(|s| s.name == name)
    }

    pub fn find_relocation(&self, name: &str) -> Option<&Relocation> {
        self.relocations.iter().find(|r| r.name == name)
    }

    pub fn find_relocation_mut(&mut self, name: &str) -> Option<&mut Relocation> {
        self.relocations.iter_mut().find(|r| r.name == name)
    }

    pub fn find_hatch_reference_mut(&mut self, name: &str) -> Option<&mut HatchReference> {
        self.hatch_references.iter_mut().find(|h| h.name == name)
    }
}
