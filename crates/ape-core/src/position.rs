use std::fmt;
use std::rc::Rc;

/// `{file-ref, line, column}`, attached to every token, AST node, and
/// bytecode byte (via the compiler's parallel source-position stream).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourcePosition {
    pub file: Option<Rc<str>>,
    pub line: u32,
    pub column: u32,
}

impl SourcePosition {
    pub fn new(file: Option<Rc<str>>, line: u32, column: u32) -> Self {
        SourcePosition { file, line, column }
    }

    /// Position for generated/synthetic nodes that have no real source span
    /// (e.g. the constructor call emitted for a `recover` handler's implicit
    /// error binding).
    pub fn synthetic() -> Self {
        SourcePosition::default()
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line + 1, self.column + 1),
            None => write!(f, "{}:{}", self.line + 1, self.column + 1),
        }
    }
}
