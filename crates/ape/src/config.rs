//! Engine configuration (spec.md §6's "configuration, call before first
//! compile"), built with the same `with_*` builder pattern the teacher's
//! `CompilerConfig` uses (`examples/navicore-cem3/crates/compiler/src/config.rs`).

use std::rc::Rc;
use std::time::Duration;

use ape_compiler::FileReader;

/// Callback used to resolve `import` statements to source text. Returning
/// `Err` fails the compile that triggered the import.
pub type FileReaderFn = FileReader;
/// Callback the host supplies to receive script output (the `print`-family
/// built-ins are out of scope here; this is just the wiring they would use —
/// spec.md §1's "File I/O, stdout I/O ... provided by injected callbacks").
pub type StdoutWriterFn = dyn Fn(&str);
/// Callback used to write a file from script code, mirroring
/// [`FileReaderFn`]'s read side.
pub type FileWriterFn = dyn Fn(&str, &str) -> Result<(), ape_core::EngineError>;

#[derive(Clone, Default)]
pub struct EngineConfig {
    /// Allows a later `execute` to redeclare a module-global name an
    /// earlier one already bound, instead of treating it as a compile
    /// error (spec.md §6's REPL mode).
    pub(crate) repl_mode: bool,
    /// Wall-clock budget for a single `run`/`call`; `None` disables the
    /// timeout sampling entirely.
    pub(crate) max_execution_time: Option<Duration>,
    /// Resolves `import` paths to source text. `None` makes any `import`
    /// a compile error.
    pub(crate) file_reader: Option<Rc<FileReaderFn>>,
    /// Directory the top-level script is considered to live in, for
    /// resolving its own relative `import`s.
    pub(crate) source_dir: Option<String>,
    /// Receives text a registered native (e.g. a host-supplied `print`)
    /// chooses to emit. `None` means script output has nowhere to go.
    pub(crate) stdout_writer: Option<Rc<StdoutWriterFn>>,
    /// Writes a file from script code via a registered native. `None` makes
    /// any such native fail.
    pub(crate) file_writer: Option<Rc<FileWriterFn>>,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("repl_mode", &self.repl_mode)
            .field("max_execution_time", &self.max_execution_time)
            .field("file_reader", &self.file_reader.is_some())
            .field("source_dir", &self.source_dir)
            .field("stdout_writer", &self.stdout_writer.is_some())
            .field("file_writer", &self.file_writer.is_some())
            .finish()
    }
}

impl EngineConfig {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }
}

/// Builder for [`EngineConfig`], mirroring the teacher's `CompilerConfig`
/// builder: each `with_*` consumes and returns `Self` so configuration
/// reads as a single chained expression.
#[derive(Clone, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        EngineBuilder::default()
    }

    /// REPL mode: re-running a line that redeclares `const x = ...` reuses
    /// the existing slot instead of failing to compile.
    pub fn with_repl_mode(mut self, enabled: bool) -> Self {
        self.config.repl_mode = enabled;
        self
    }

    pub fn with_max_execution_time(mut self, timeout: Duration) -> Self {
        self.config.max_execution_time = Some(timeout);
        self
    }

    pub fn with_file_reader(mut self, reader: impl Fn(&str) -> Result<String, ape_core::EngineError> + 'static) -> Self {
        self.config.file_reader = Some(Rc::new(reader));
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.source_dir = Some(dir.into());
        self
    }

    pub fn with_stdout_writer(mut self, writer: impl Fn(&str) + 'static) -> Self {
        self.config.stdout_writer = Some(Rc::new(writer));
        self
    }

    pub fn with_file_writer(mut self, writer: impl Fn(&str, &str) -> Result<(), ape_core::EngineError> + 'static) -> Self {
        self.config.file_writer = Some(Rc::new(writer));
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
