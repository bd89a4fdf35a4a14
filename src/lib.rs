//! Bolt: an assembler, linker and virtual core for a custom 32-bit VM.
//!
//! See `src/bin/bolt.rs` for the command-line driver that ties these
//! together; this crate is usable standalone as a library.

pub mod common;
pub mod front;
pub mod middle;
pub mod back;
