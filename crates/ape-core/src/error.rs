//! Error taxonomy (spec.md §7).
//!
//! Parsing/Compilation errors halt the pipeline and roll the engine state
//! back; Runtime errors attempt the recover mechanism first; Timeout and
//! Allocation are never recoverable by the script; User errors (raised by
//! native functions) propagate identically to Runtime errors.

use crate::position::SourcePosition;
use std::fmt;

/// Bounded message length, matching the original implementation's 255-byte
/// cap on error messages (`h7/errors.h`).
pub const ERROR_MESSAGE_MAX: usize = 255;

/// Error queue cap: beyond this many collected errors, new ones are
/// silently dropped so the first failure is preserved (spec.md §7).
pub const ERRORS_MAX_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    None,
    Parsing,
    Compilation,
    Runtime,
    Timeout,
    Allocation,
    User,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::None => "None",
            ErrorKind::Parsing => "Parsing",
            ErrorKind::Compilation => "Compilation",
            ErrorKind::Runtime => "Runtime",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Allocation => "Allocation",
            ErrorKind::User => "User",
        };
        f.write_str(s)
    }
}

/// One frame of a captured traceback: innermost first, function name plus
/// the position of the call site (spec.md §4.7, §9 "Recover as non-local
/// control").
#[derive(Debug, Clone, PartialEq)]
pub struct TracebackEntry {
    pub function_name: String,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub position: SourcePosition,
    pub traceback: Option<Vec<TracebackEntry>>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, position: SourcePosition) -> Self {
        let mut message = message.into();
        if message.len() > ERROR_MESSAGE_MAX {
            let mut truncated = message.as_str();
            while !truncated.is_char_boundary(ERROR_MESSAGE_MAX) {
                truncated = &truncated[..truncated.len() - 1];
            }
            message = truncated[..ERROR_MESSAGE_MAX.min(truncated.len())].to_string();
        }
        EngineError {
            kind,
            message,
            position,
            traceback: None,
        }
    }

    pub fn parsing(message: impl Into<String>, position: SourcePosition) -> Self {
        Self::new(ErrorKind::Parsing, message, position)
    }

    pub fn compilation(message: impl Into<String>, position: SourcePosition) -> Self {
        Self::new(ErrorKind::Compilation, message, position)
    }

    pub fn runtime(message: impl Into<String>, position: SourcePosition) -> Self {
        Self::new(ErrorKind::Runtime, message, position)
    }

    pub fn timeout(position: SourcePosition) -> Self {
        Self::new(ErrorKind::Timeout, "execution timed out", position)
    }

    pub fn allocation(message: impl Into<String>, position: SourcePosition) -> Self {
        Self::new(ErrorKind::Allocation, message, position)
    }

    pub fn user(message: impl Into<String>, position: SourcePosition) -> Self {
        Self::new(ErrorKind::User, message, position)
    }

    pub fn with_traceback(mut self, traceback: Vec<TracebackEntry>) -> Self {
        self.traceback = Some(traceback);
        self
    }

    /// Runtime errors are recoverable by a lexically enclosing `recover`
    /// block; Timeout/Allocation are not; Parsing/Compilation never reach
    /// the VM so the question doesn't apply to them.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind, ErrorKind::Runtime | ErrorKind::User)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.kind, self.message, self.position)
    }
}

impl std::error::Error for EngineError {}

/// A capped FIFO of collected errors (spec.md §7: "capped at 16; beyond
/// that, new errors are silently dropped").
#[derive(Debug, Default, Clone)]
pub struct ErrorList {
    errors: Vec<EngineError>,
}

impl ErrorList {
    pub fn new() -> Self {
        ErrorList::default()
    }

    /// Returns `false` if the error was dropped because the queue is full.
    pub fn push(&mut self, error: EngineError) -> bool {
        if self.errors.len() >= ERRORS_MAX_COUNT {
            return false;
        }
        self.errors.push(error);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EngineError> {
        self.errors.iter()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn into_vec(self) -> Vec<EngineError> {
        self.errors
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a EngineError;
    type IntoIter = std::slice::Iter<'a, EngineError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}
