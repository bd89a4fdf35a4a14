//! The virtual core that executes a linked image.

pub mod vm;

pub use vm::{Core, DiagnosticSink, Hatch, RuntimeError, Segment};
