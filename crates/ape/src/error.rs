//! Host-facing error shape (spec.md §6: "error list with `{type, message,
//! file, line, column, traceback}`").
//!
//! [`ape_core::EngineError`] is the internal representation threaded
//! through the lexer/parser/compiler/VM; [`ScriptError`] is the flattened,
//! serialization-friendly view handed back across the embedder boundary.

use ape_core::{EngineError, ErrorKind};

/// One frame of a captured traceback, innermost call first.
#[derive(Debug, Clone, PartialEq)]
pub struct TracebackFrame {
    pub function_name: String,
    pub line: u32,
    pub column: u32,
}

/// The error shape spec.md §6 hands back to the host: `type` is kept as a
/// raw identifier since `type` is reserved, matching the field name the
/// spec actually names.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub r#type: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
    pub traceback: Vec<TracebackFrame>,
}

impl From<EngineError> for ScriptError {
    fn from(err: EngineError) -> Self {
        ScriptError {
            r#type: err.kind,
            message: err.message,
            file: err.position.file.as_deref().map(str::to_string),
            line: err.position.line,
            column: err.position.column,
            traceback: err
                .traceback
                .unwrap_or_default()
                .into_iter()
                .map(|t| TracebackFrame {
                    function_name: t.function_name,
                    line: t.position.line,
                    column: t.position.column,
                })
                .collect(),
        }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}: {} ({}:{}:{})", self.r#type, self.message, file, self.line + 1, self.column + 1),
            None => write!(f, "{}: {} ({}:{})", self.r#type, self.message, self.line + 1, self.column + 1),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Converts a batch of parse/compile errors (the pipeline's multi-error
/// case) into the capped, host-facing list (spec.md §7: "capped at 16;
/// beyond that, new errors are silently dropped").
pub(crate) fn from_engine_errors(errors: Vec<EngineError>) -> Vec<ScriptError> {
    errors
        .into_iter()
        .take(ape_core::error::ERRORS_MAX_COUNT)
        .map(ScriptError::from)
        .collect()
}
