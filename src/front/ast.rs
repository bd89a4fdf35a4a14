//! Assembler-internal label bookkeeping (§3 "Label / pending label", §9's
//! uniform `Slot` design note).
//!
//! A label is bound the moment its `NAME:` line is seen. Any reference to a
//! label seen *before* it is bound is a [`PendingLabel`]: rather than
//! keeping a raw pointer into the module's growable code buffer (unsound,
//! since the buffer reallocates), every fix-up site is recorded as a
//! [`Slot`] — a stable index into the buffer, or a reference to a module
//! field that lives outside it (only `entry`, per §9).

/// An external fix-up target: either a code-buffer word, or a module field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// A word offset inside the module's code buffer.
    InBuffer(u32),
    /// The module's `entry` field (set by `.entry`).
    EntryField,
}

/// Bookkeeping for one label name that has been referenced but not yet
/// bound to a location. Two kinds of fix-up accumulate before the label is
/// seen: `pointers` targets outside the code buffer (currently only
/// `EntryField`), and `locations` are code-buffer word offsets whose word
/// must be overwritten with the bound location.
#[derive(Debug, Clone, Default)]
pub struct PendingLabel {
    pub pointers: Vec<Slot>,
    pub locations: Vec<u32>,
}

impl PendingLabel {
    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty() && self.locations.is_empty()
    }
}

/// A label bound to a code-buffer location, recorded the moment it is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    pub location: u32,
}
