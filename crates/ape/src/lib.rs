//! Embeddable scripting engine: the host-facing `Engine`/`EngineConfig`
//! façade over the ape lexer, compiler, and virtual machine.
//!
//! ```rust,ignore
//! use ape::{Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::builder().build());
//! let result = engine.execute("1 + 2").unwrap();
//! assert_eq!(result.as_number(), Some(3.0));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod value;

pub use ape_compiler::Program;
pub use ape_core::ErrorKind;
pub use ape_runtime::{Value, ValueKind, Vm};

pub use config::{EngineBuilder, EngineConfig};
pub use engine::Engine;
pub use error::{ScriptError, TracebackFrame};
