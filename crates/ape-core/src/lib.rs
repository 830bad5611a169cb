//! Shared foundation for the ape scripting engine.
//!
//! This crate sits at the bottom of the dependency graph (`ape-runtime` and
//! `ape-compiler` both depend on it, nothing in it depends back on them): a
//! source position type attached to every token/AST node/bytecode byte, the
//! exhaustive opcode table the compiler emits and the VM dispatches, and the
//! error taxonomy that flows from lexer to host.

pub mod error;
pub mod opcode;
pub mod position;

pub use error::{EngineError, ErrorKind, TracebackEntry};
pub use opcode::Opcode;
pub use position::SourcePosition;
