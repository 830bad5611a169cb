//! The embedder façade (spec.md §6): one `Engine` owns one `Vm`, one
//! persisted module symbol table, and the registry of host-provided
//! globals, exposing `execute`/`compile`/`execute_program`/`call` plus
//! global registration and value construction.

use std::path::Path;
use std::rc::Rc;

use ape_compiler::{Compiler, Program, SymbolScope, SymbolTable};
use ape_core::{EngineError, ErrorKind, SourcePosition};
use ape_runtime::{ApeMap, ExternalData, Value, Vm};

use crate::config::EngineConfig;
use crate::error::{from_engine_errors, ScriptError};

/// One embeddable instance of the scripting engine. Owns its `Vm` (heap,
/// operand stacks, registered natives) and the module-scope symbol table
/// carried forward between compiles, so a later `execute` can resolve
/// names an earlier one defined (spec.md §5's "Shared resources ... owned
/// by one `Engine` instance").
pub struct Engine {
    vm: Vm,
    config: EngineConfig,
    /// Host-registered globals, name plus the `ape_globals` slot
    /// `Vm::register_native`/`register_global_value` assigned them. Handed
    /// to every fresh `Compiler` so it can resolve them as `ApeGlobal`s.
    ape_global_names: Vec<(String, usize)>,
    /// Module scope carried forward from the previous successful compile.
    /// `None` before the first compile. A failed compile never reaches the
    /// point where this is overwritten, which is what makes rollback free
    /// (spec.md §8 invariant 1): the in-progress `Compiler`'s mutated copy
    /// is simply dropped, leaving this one untouched.
    symbols: Option<SymbolTable>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Engine {
        Engine {
            vm: Vm::new(),
            config,
            ape_global_names: Vec::new(),
            symbols: None,
        }
    }

    /// Registers a native function callable from scripts as `name(...)`.
    pub fn set_native_function(
        &mut self,
        name: &str,
        func: impl Fn(&mut Vm, &[Value]) -> Result<Value, EngineError> + 'static,
    ) {
        let index = self.vm.register_native(name, func);
        self.register_ape_global(name, index);
    }

    /// Registers a constant value under `name`, readable from scripts and
    /// via [`Engine::get_object`].
    pub fn set_global_constant(&mut self, name: &str, value: Value) {
        let index = self.vm.register_global_value(value);
        self.register_ape_global(name, index);
    }

    fn register_ape_global(&mut self, name: &str, index: usize) {
        self.ape_global_names.push((name.to_string(), index));
        // Registering after the first compile needs to reach into the
        // already-carried-forward scope directly, since a fresh `Compiler`
        // only seeds `ape_global_names` into a *new* scope and this one
        // overrides that with `with_symbols` (see `execute_program`).
        if let Some(symbols) = self.symbols.as_mut() {
            symbols.define_ape_global(name, index);
        }
    }

    /// Looks up a named global's current value: a host-registered native
    /// or constant, or a module-level `var`/`const` a script has defined.
    pub fn get_object(&mut self, name: &str) -> Option<Value> {
        if let Some((_, index)) = self.ape_global_names.iter().find(|(n, _)| n == name) {
            return self.vm.ape_global(*index);
        }
        let symbol = self.symbols.as_mut()?.resolve(name)?;
        match symbol.scope {
            SymbolScope::ModuleGlobal => self.vm.globals().get(symbol.index, SourcePosition::synthetic()).ok(),
            SymbolScope::ApeGlobal => self.vm.ape_global(symbol.index),
            _ => None,
        }
    }

    pub fn make_string(&self, s: &str) -> Value {
        self.vm.box_string(s)
    }

    pub fn make_array(&self, items: Vec<Value>) -> Value {
        self.vm.box_array(items)
    }

    pub fn make_map(&self, map: ApeMap) -> Value {
        self.vm.box_map(map)
    }

    pub fn make_error(&self, message: &str) -> Value {
        self.vm.box_error(message)
    }

    pub fn make_external(&self, data: Rc<dyn ExternalData>) -> Value {
        self.vm.box_external(data)
    }

    /// Hands back the configured stdout-writer callback (spec.md §6), so a
    /// host registering a `print`-style native via [`Engine::set_native_function`]
    /// can clone it into the native's closure — natives only ever see
    /// `&mut Vm`, not the `Engine`, so the callback has to be captured at
    /// registration time rather than looked up from inside the call.
    pub fn stdout_writer(&self) -> Option<Rc<crate::config::StdoutWriterFn>> {
        self.config.stdout_writer.clone()
    }

    /// Hands back the configured file-writer callback, for the same reason
    /// as [`Engine::stdout_writer`].
    pub fn file_writer(&self) -> Option<Rc<crate::config::FileWriterFn>> {
        self.config.file_writer.clone()
    }

    /// Parses and optimises `source` without compiling or running it.
    pub fn compile(&self, source: &str) -> Result<Program, Vec<ScriptError>> {
        self.compile_named(source, None)
    }

    fn compile_named(&self, source: &str, file: Option<Rc<str>>) -> Result<Program, Vec<ScriptError>> {
        let program = ape_compiler::parse(source, file).map_err(from_engine_errors)?;
        Ok(ape_compiler::optimise(program))
    }

    /// Compiles `program` to bytecode against the carried-forward module
    /// scope and runs it to completion.
    pub fn execute_program(&mut self, program: &Program) -> Result<Value, Vec<ScriptError>> {
        let mut compiler = Compiler::new(&self.vm, self.ape_global_names.clone())
            .with_redefinition_allowed(self.config.repl_mode);
        if let Some(dir) = self.config.source_dir.clone() {
            compiler = compiler.with_source_dir(dir);
        }
        if let Some(reader) = self.config.file_reader.clone() {
            compiler = compiler.with_file_reader(reader);
        }
        if let Some(symbols) = self.symbols.take() {
            compiler = compiler.with_symbols(symbols);
        }

        let (function, constants, symbols) = match compiler.compile_program(program) {
            Ok(ok) => ok,
            Err(err) => {
                tracing::debug!(error = %err, "compile failed, rolling back to prior module scope");
                return Err(from_engine_errors(vec![err]));
            }
        };
        self.symbols = Some(symbols);

        self.vm.set_timeout(self.config.max_execution_time);
        self.vm.run(function, constants).map_err(|err| from_engine_errors(vec![err]))
    }

    /// Parses, compiles, and runs `source` in one call.
    pub fn execute(&mut self, source: &str) -> Result<Value, Vec<ScriptError>> {
        let program = self.compile_named(source, None)?;
        self.execute_program(&program)
    }

    /// Reads, parses, compiles, and runs the script at `path`. Relative
    /// `import`s in the script resolve against `path`'s own directory
    /// unless [`crate::EngineBuilder::with_source_dir`] already set one.
    pub fn execute_file(&mut self, path: &Path) -> Result<Value, Vec<ScriptError>> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            vec![ScriptError {
                r#type: ErrorKind::Compilation,
                message: format!("failed to read {}: {e}", path.display()),
                file: Some(path.display().to_string()),
                line: 0,
                column: 0,
                traceback: Vec::new(),
            }]
        })?;
        let file: Rc<str> = Rc::from(path.display().to_string());
        let program = self.compile_named(&source, Some(file))?;
        if self.config.source_dir.is_none() {
            if let Some(parent) = path.parent() {
                self.config.source_dir = Some(parent.display().to_string());
            }
        }
        self.execute_program(&program)
    }

    /// Calls a named global (a host-registered native or a script-defined
    /// function) with `args`, bypassing a fresh compile entirely.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let callee = self.get_object(name).ok_or_else(|| ScriptError {
            r#type: ErrorKind::Runtime,
            message: format!("no such global: {name}"),
            file: None,
            line: 0,
            column: 0,
            traceback: Vec::new(),
        })?;
        self.vm.set_timeout(self.config.max_execution_time);
        self.vm
            .call_value(callee, args, SourcePosition::synthetic())
            .map_err(ScriptError::from)
    }
}
