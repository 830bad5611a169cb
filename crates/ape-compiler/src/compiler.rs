//! Bytecode compiler (spec.md §4.5): walks the optimised AST once, emitting
//! opcodes into the current [`CompilationScope`], resolving names through
//! the [`SymbolTable`], and interning constants (including nested function
//! templates) into a single shared pool.

use std::collections::HashSet;
use std::rc::Rc;

use ape_core::{EngineError, Opcode, SourcePosition};
use ape_runtime::{ApeMap, FunctionObj, ObjectData, SString, Value, Vm};

use crate::ast::*;
use crate::symbol_table::{SymbolScope, SymbolTable};

struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

/// Addresses of `break`/`continue` jumps awaiting patch once the loop they
/// belong to finishes compiling. One of these is pushed per loop entered,
/// so a `break` inside a nested loop's body can never patch into its
/// enclosing loop's targets (or vice versa).
#[derive(Default)]
struct LoopTargets {
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
}

/// One function body's worth of in-progress bytecode. The compiler keeps a
/// stack of these — one per nested function literal — mirroring the
/// symbol table's own nesting.
struct CompilationScope {
    bytecode: Vec<u8>,
    positions: Vec<SourcePosition>,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
    loop_stack: Vec<LoopTargets>,
}

impl CompilationScope {
    fn new() -> CompilationScope {
        CompilationScope {
            bytecode: Vec::new(),
            positions: Vec::new(),
            last: None,
            previous: None,
            loop_stack: Vec::new(),
        }
    }
}

pub type FileReader = dyn Fn(&str) -> Result<String, EngineError>;

pub struct Compiler<'vm> {
    vm: &'vm Vm,
    scopes: Vec<CompilationScope>,
    symbols: SymbolTable,
    constants: Vec<Value>,
    ape_global_names: Vec<(String, usize)>,
    file_reader: Option<Rc<FileReader>>,
    /// Directory of the file currently being compiled, used to resolve a
    /// relative `import` path; `None` at the toplevel script.
    current_dir: Option<String>,
    /// Canonical paths on the current import chain, for cyclic-import
    /// detection.
    compiling_stack: Vec<String>,
    /// Canonical paths already imported anywhere in this compilation, for
    /// re-import rejection (spec: re-imports are a compile error, not a
    /// silent no-op).
    loaded_modules: HashSet<String>,
}

impl<'vm> Compiler<'vm> {
    pub fn new(vm: &'vm Vm, ape_global_names: Vec<(String, usize)>) -> Compiler<'vm> {
        let mut symbols = SymbolTable::new_module_scope();
        for (name, idx) in &ape_global_names {
            symbols.define_ape_global(name, *idx);
        }
        Compiler {
            vm,
            scopes: vec![CompilationScope::new()],
            symbols,
            constants: Vec::new(),
            ape_global_names,
            file_reader: None,
            current_dir: None,
            compiling_stack: Vec::new(),
            loaded_modules: HashSet::new(),
        }
    }

    /// Supplies the callback used to resolve `import` statements to source
    /// text. Without one, any `import` is a compile error.
    pub fn with_file_reader(mut self, reader: Rc<FileReader>) -> Self {
        self.file_reader = Some(reader);
        self
    }

    /// Sets the directory the top-level script is considered to live in,
    /// so its own `import "./sibling.ape"` resolves relative to it.
    pub fn with_source_dir(mut self, dir: impl Into<String>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// REPL mode: a later compile of the same `Compiler`'s module scope may
    /// redeclare a name already bound by an earlier one (spec.md §6).
    /// Script mode (the default) rejects that as a compile error.
    pub fn with_redefinition_allowed(mut self, allowed: bool) -> Self {
        self.symbols = std::mem::replace(&mut self.symbols, SymbolTable::new_module_scope())
            .with_redefinition_allowed(allowed);
        self
    }

    /// Carries a module scope forward from an earlier compile (the REPL's
    /// incremental-compile case: each line gets its own `Compiler`, but all
    /// of them must resolve names a previous line defined). Replaces the
    /// fresh scope `new` set up, including the `ape_global_names` it
    /// already registered there — callers only need this when resuming a
    /// prior session, never on a script's first compile.
    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = symbols;
        self
    }

    /// Compiles `program` against the current module scope, returning the
    /// scope back to the caller alongside the emitted function and constant
    /// pool. Handing the scope back (rather than dropping it with the rest
    /// of `self`) is what makes a failed compile a no-op on the caller's
    /// persisted state: the caller only stores the returned scope on `Ok`,
    /// so an `Err` leaves whatever scope it passed into [`Self::with_symbols`]
    /// untouched (spec.md §8 invariant 1's snapshot/rollback, achieved here
    /// through ownership rather than an explicit snapshot copy).
    pub fn compile_program(
        mut self,
        program: &Program,
    ) -> Result<(Rc<FunctionObj>, Rc<[Value]>, SymbolTable), EngineError> {
        for stmt in &program.statements {
            self.compile_statement(stmt)?;
        }
        self.emit(Opcode::Return, &[], SourcePosition::synthetic());
        let scope = self.scopes.pop().expect("module scope always present");
        let function = Rc::new(FunctionObj {
            name: Some(Rc::from("<module>")),
            bytecode: Rc::from(scope.bytecode.into_boxed_slice()),
            positions: Rc::from(scope.positions.into_boxed_slice()),
            num_locals: self.symbols.num_locals(),
            num_args: 0,
            free_vars: Default::default(),
        });
        Ok((function, Rc::from(self.constants.into_boxed_slice()), self.symbols))
    }

    fn scope(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("at least one compilation scope")
    }

    fn emit(&mut self, op: Opcode, operands: &[u64], position: SourcePosition) -> usize {
        let widths = op.operand_widths();
        let scope = self.scopes.last_mut().expect("at least one compilation scope");
        let start = scope.bytecode.len();
        scope.bytecode.push(op as u8);
        for (&operand, &width) in operands.iter().zip(widths.iter()) {
            match width {
                1 => scope.bytecode.push(operand as u8),
                2 => scope.bytecode.extend_from_slice(&(operand as u16).to_be_bytes()),
                8 => scope.bytecode.extend_from_slice(&operand.to_be_bytes()),
                _ => unreachable!("unsupported operand width"),
            }
        }
        for _ in 0..op.instruction_len() {
            scope.positions.push(position.clone());
        }
        scope.previous = scope.last.take();
        scope.last = Some(EmittedInstruction { opcode: op, position: start });
        start
    }

    fn emit_number(&mut self, n: f64, position: SourcePosition) {
        self.emit(Opcode::Number, &[n.to_bits()], position);
    }

    fn add_constant(&mut self, v: Value) -> u16 {
        self.constants.push(v);
        (self.constants.len() - 1) as u16
    }

    fn patch_jump(&mut self, instruction_pos: usize, target: usize) {
        let scope = self.scope();
        let target_bytes = (target as u16).to_be_bytes();
        scope.bytecode[instruction_pos + 1] = target_bytes[0];
        scope.bytecode[instruction_pos + 2] = target_bytes[1];
    }

    fn current_pos(&mut self) -> usize {
        self.scope().bytecode.len()
    }

    fn compile_statement(&mut self, stmt: &Statement) -> Result<(), EngineError> {
        let pos = stmt.position.clone();
        match &stmt.kind {
            StatementKind::Expression(expr) => {
                self.compile_expression(expr)?;
                self.emit(Opcode::Pop, &[], pos);
            }
            StatementKind::VarDecl { name, value, .. } => {
                self.compile_expression(value)?;
                let symbol = self
                    .symbols
                    .define(name)
                    .map_err(|e| EngineError::compilation(e, pos.clone()))?;
                self.emit_define(&symbol, pos);
            }
            StatementKind::Return(value) => {
                match value {
                    Some(expr) => {
                        self.compile_expression(expr)?;
                        self.emit(Opcode::ReturnValue, &[], pos);
                    }
                    None => {
                        self.emit(Opcode::Return, &[], pos);
                    }
                }
            }
            StatementKind::Block(stmts) => {
                self.symbols.push_block();
                for s in stmts {
                    self.compile_statement(s)?;
                }
                self.symbols.pop_block();
            }
            StatementKind::If { branches, otherwise } => {
                self.compile_if(branches, otherwise, pos)?;
            }
            StatementKind::While { condition, body } => {
                self.compile_while(condition, body, pos)?;
            }
            StatementKind::ForIn {
                binding,
                iterable,
                body,
            } => {
                self.compile_for_in(binding, iterable, body, pos)?;
            }
            StatementKind::ForLoop {
                init,
                condition,
                update,
                body,
            } => {
                self.compile_for_loop(init.as_deref(), condition.as_ref(), update.as_deref(), body, pos)?;
            }
            StatementKind::Break => {
                let jump = self.emit(Opcode::Jump, &[0], pos.clone());
                match self.scope().loop_stack.last_mut() {
                    Some(targets) => targets.break_jumps.push(jump),
                    None => return Err(EngineError::compilation("break used outside of a loop", pos)),
                }
            }
            StatementKind::Continue => {
                let jump = self.emit(Opcode::Jump, &[0], pos.clone());
                match self.scope().loop_stack.last_mut() {
                    Some(targets) => targets.continue_jumps.push(jump),
                    None => return Err(EngineError::compilation("continue used outside of a loop", pos)),
                }
            }
            StatementKind::Import { path } => {
                self.compile_import(path, pos)?;
            }
            StatementKind::Recover { error_binding, body } => {
                self.compile_recover(error_binding, body, pos)?;
            }
        }
        Ok(())
    }

    fn emit_define(&mut self, symbol: &crate::symbol_table::Symbol, pos: SourcePosition) {
        match symbol.scope {
            SymbolScope::ModuleGlobal => {
                self.emit(Opcode::DefineModuleGlobal, &[symbol.index as u64], pos);
            }
            SymbolScope::Local => {
                self.emit(Opcode::DefineLocal, &[symbol.index as u64], pos);
            }
            _ => unreachable!("define only produces ModuleGlobal or Local symbols"),
        }
    }

    fn emit_get(&mut self, symbol: &crate::symbol_table::Symbol, pos: SourcePosition) {
        match symbol.scope {
            SymbolScope::ModuleGlobal => self.emit(Opcode::GetModuleGlobal, &[symbol.index as u64], pos),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index as u64], pos),
            SymbolScope::ApeGlobal => self.emit(Opcode::GetApeGlobal, &[symbol.index as u64], pos),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index as u64], pos),
            SymbolScope::Function => self.emit(Opcode::CurrentFunction, &[], pos),
            SymbolScope::This => self.emit(Opcode::GetThis, &[], pos),
        };
    }

    fn compile_if(
        &mut self,
        branches: &[(Expression, Vec<Statement>)],
        otherwise: &Option<Vec<Statement>>,
        pos: SourcePosition,
    ) -> Result<(), EngineError> {
        let mut end_jumps = Vec::new();
        for (condition, body) in branches {
            self.compile_expression(condition)?;
            let jump_false = self.emit(Opcode::JumpIfFalse, &[0], pos.clone());
            self.symbols.push_block();
            for s in body {
                self.compile_statement(s)?;
            }
            self.symbols.pop_block();
            let jump_end = self.emit(Opcode::Jump, &[0], pos.clone());
            end_jumps.push(jump_end);
            let after_branch = self.current_pos();
            self.patch_jump(jump_false, after_branch);
        }
        if let Some(stmts) = otherwise {
            self.symbols.push_block();
            for s in stmts {
                self.compile_statement(s)?;
            }
            self.symbols.pop_block();
        }
        let end = self.current_pos();
        for jump in end_jumps {
            self.patch_jump(jump, end);
        }
        Ok(())
    }

    fn push_loop(&mut self) {
        self.scope().loop_stack.push(LoopTargets::default());
    }

    fn pop_loop(&mut self) -> LoopTargets {
        self.scope()
            .loop_stack
            .pop()
            .expect("pop_loop called without a matching push_loop")
    }

    fn compile_while(&mut self, condition: &Expression, body: &[Statement], pos: SourcePosition) -> Result<(), EngineError> {
        let loop_start = self.current_pos();
        self.compile_expression(condition)?;
        let jump_end = self.emit(Opcode::JumpIfFalse, &[0], pos.clone());
        self.push_loop();
        self.symbols.push_block();
        for s in body {
            self.compile_statement(s)?;
        }
        self.symbols.pop_block();
        let targets = self.pop_loop();
        for j in targets.continue_jumps {
            self.patch_jump(j, loop_start);
        }
        self.emit(Opcode::Jump, &[loop_start as u64], pos);
        let end = self.current_pos();
        self.patch_jump(jump_end, end);
        for j in targets.break_jumps {
            self.patch_jump(j, end);
        }
        Ok(())
    }

    /// Desugars the c-style `for (init; cond; update) { body }` into a
    /// `while`-shaped loop where `continue` runs `update` before looping.
    fn compile_for_loop(
        &mut self,
        init: Option<&Statement>,
        condition: Option<&Expression>,
        update: Option<&Statement>,
        body: &[Statement],
        pos: SourcePosition,
    ) -> Result<(), EngineError> {
        self.symbols.push_block();
        if let Some(stmt) = init {
            self.compile_statement(stmt)?;
        }
        let loop_start = self.current_pos();
        let jump_end = match condition {
            Some(cond) => {
                self.compile_expression(cond)?;
                Some(self.emit(Opcode::JumpIfFalse, &[0], pos.clone()))
            }
            None => None,
        };
        self.push_loop();
        self.symbols.push_block();
        for s in body {
            self.compile_statement(s)?;
        }
        self.symbols.pop_block();
        let continue_target = self.current_pos();
        let targets = self.pop_loop();
        for j in targets.continue_jumps {
            self.patch_jump(j, continue_target);
        }
        if let Some(stmt) = update {
            self.compile_statement(stmt)?;
        }
        self.emit(Opcode::Jump, &[loop_start as u64], pos);
        let end = self.current_pos();
        if let Some(j) = jump_end {
            self.patch_jump(j, end);
        }
        for j in targets.break_jumps {
            self.patch_jump(j, end);
        }
        self.symbols.pop_block();
        Ok(())
    }

    /// Desugars `for (x in it) { body }` into an index-driven `while` over
    /// `it`, since the VM has no dedicated iterator protocol (spec.md
    /// §4.5's note that `for`/`foreach` compile down to `WHILE` + `GET_INDEX`).
    fn compile_for_in(
        &mut self,
        binding: &str,
        iterable: &Expression,
        body: &[Statement],
        pos: SourcePosition,
    ) -> Result<(), EngineError> {
        self.symbols.push_block();
        let iter_symbol = self
            .symbols
            .define("__for_iter__")
            .expect("internal loop-bookkeeping name never clashes");
        self.compile_expression(iterable)?;
        self.emit_define(&iter_symbol, pos.clone());

        let index_symbol = self
            .symbols
            .define("__for_index__")
            .expect("internal loop-bookkeeping name never clashes");
        self.emit_number(0.0, pos.clone());
        self.emit_define(&index_symbol, pos.clone());

        let loop_start = self.current_pos();
        self.emit_get(&index_symbol, pos.clone());
        self.emit_get(&iter_symbol, pos.clone());
        self.emit(Opcode::Len, &[], pos.clone());
        self.emit(Opcode::GreaterThanEqual, &[], pos.clone());
        let jump_end = self.emit(Opcode::JumpIfTrue, &[0], pos.clone());

        self.emit_get(&iter_symbol, pos.clone());
        self.emit_get(&index_symbol, pos.clone());
        self.emit(Opcode::GetIndex, &[], pos.clone());
        let binding_symbol = self
            .symbols
            .define(binding)
            .map_err(|e| EngineError::compilation(e, pos.clone()))?;
        self.emit_define(&binding_symbol, pos.clone());

        self.push_loop();
        self.symbols.push_block();
        for s in body {
            self.compile_statement(s)?;
        }
        self.symbols.pop_block();

        let continue_target = self.current_pos();
        let targets = self.pop_loop();
        for j in targets.continue_jumps {
            self.patch_jump(j, continue_target);
        }
        self.emit_get(&index_symbol, pos.clone());
        self.emit_number(1.0, pos.clone());
        self.emit(Opcode::Add, &[], pos.clone());
        self.emit_define(&index_symbol, pos.clone());
        self.emit(Opcode::Jump, &[loop_start as u64], pos.clone());

        let end = self.current_pos();
        self.patch_jump(jump_end, end);
        for j in targets.break_jumps {
            self.patch_jump(j, end);
        }
        self.symbols.pop_block();
        Ok(())
    }

    /// Imports are textual-include style, not module linking: the imported
    /// file's source is read, parsed, optimised, and compiled straight into
    /// the importer's own bytecode at the `import` statement's point. Its
    /// top-level bindings become visible to the importer under a
    /// `modulename::name` alias, per spec.md §4.5; the bare names are not
    /// exposed. Cyclic imports and re-imports of an already-loaded module
    /// are both compile errors.
    fn compile_import(&mut self, path: &str, pos: SourcePosition) -> Result<(), EngineError> {
        let resolved = resolve_relative(&self.current_dir, path);
        let canonical = canonicalize_import_path(&resolved);

        if self.compiling_stack.iter().any(|p| p == &canonical) {
            return Err(EngineError::compilation(format!("cyclic import: {canonical}"), pos));
        }
        if self.loaded_modules.contains(&canonical) {
            return Err(EngineError::compilation(format!("module already imported: {canonical}"), pos));
        }

        let reader = self.file_reader.clone().ok_or_else(|| {
            EngineError::compilation(
                "import requires a file reader to be configured on the engine",
                pos.clone(),
            )
        })?;
        tracing::debug!(module = %canonical, "resolving import");
        let source = reader(&format!("{canonical}.ape"))?;
        let program =
            crate::parser::parse(&source, Some(Rc::from(canonical.as_str()))).map_err(|mut errs| {
                errs.drain(..)
                    .next()
                    .unwrap_or_else(|| EngineError::compilation("import source failed to parse", pos.clone()))
            })?;
        let program = crate::optimiser::optimise(program);

        self.loaded_modules.insert(canonical.clone());
        self.compiling_stack.push(canonical.clone());
        let previous_dir = std::mem::replace(&mut self.current_dir, parent_dir(&canonical));

        let module_local = path.rsplit('/').next().unwrap_or(path).trim_end_matches(".ape").to_string();
        let result = (|| -> Result<(), EngineError> {
            for stmt in &program.statements {
                self.compile_imported_statement(&module_local, stmt)?;
            }
            Ok(())
        })();

        self.current_dir = previous_dir;
        self.compiling_stack.pop();
        result
    }

    /// Compiles one top-level statement of an imported file. A binding
    /// (`const`/`var`) is aliased as `module::name`; everything else
    /// compiles exactly as it would at the importer's own top level.
    fn compile_imported_statement(&mut self, module_local: &str, stmt: &Statement) -> Result<(), EngineError> {
        let pos = stmt.position.clone();
        match &stmt.kind {
            StatementKind::VarDecl { name, value, .. } => {
                self.compile_expression(value)?;
                let symbol = self
                    .symbols
                    .define_module_alias(&format!("{module_local}::{name}"))
                    .map_err(|e| EngineError::compilation(e, pos.clone()))?;
                self.emit_define(&symbol, pos);
                Ok(())
            }
            StatementKind::Import { path } => self.compile_import(path, pos),
            _ => self.compile_statement(stmt),
        }
    }

    /// `recover (err) { body }` installs `body` as the handler for the
    /// first unrecovered error raised anywhere later in this function.
    /// There is no separate protected block: everything after this
    /// statement runs with the handler armed, and `body` itself is only
    /// ever entered by the VM jumping to it out of band, never by falling
    /// through (spec.md §4.5).
    fn compile_recover(&mut self, error_binding: &str, body: &[Statement], pos: SourcePosition) -> Result<(), EngineError> {
        if self.symbols.is_module_global_scope() {
            return Err(EngineError::compilation(
                "recover statement cannot be defined in global scope",
                pos,
            ));
        }
        // `block_depth() == 1` means directly in the enclosing function's
        // outermost block, not nested inside an `if`/`while`/`{}` that
        // pushed an extra scope.
        if self.symbols.block_depth() != 1 {
            return Err(EngineError::compilation(
                "recover statement cannot be defined within other statements",
                pos,
            ));
        }

        let recover_instr = self.emit(Opcode::SetRecover, &[0], pos.clone());
        let jump_over_handler = self.emit(Opcode::Jump, &[0], pos.clone());

        let handler_start = self.current_pos();
        self.patch_jump(recover_instr, handler_start);

        self.symbols.push_block();
        let err_symbol = self
            .symbols
            .define(error_binding)
            .map_err(|e| EngineError::compilation(e, pos.clone()))?;
        self.emit_define(&err_symbol, pos.clone());
        for s in body {
            self.compile_statement(s)?;
        }
        // The handler must end with an explicit `return`: it never falls
        // back out into the code after the `recover` statement on its own
        // (spec.md §4.5).
        match self.scope().last.as_ref().map(|i| i.opcode) {
            Some(Opcode::Return) | Some(Opcode::ReturnValue) => {}
            _ => {
                return Err(EngineError::compilation(
                    "recover body must end with a return statement",
                    pos,
                ));
            }
        }
        self.symbols.pop_block();

        let after_recover = self.current_pos();
        self.patch_jump(jump_over_handler, after_recover);
        Ok(())
    }

    fn compile_expression(&mut self, expr: &Expression) -> Result<(), EngineError> {
        let pos = expr.position.clone();
        match &expr.kind {
            ExpressionKind::Number(n) => self.emit_number(*n, pos),
            ExpressionKind::Bool(b) => {
                self.emit(if *b { Opcode::True } else { Opcode::False }, &[], pos);
            }
            ExpressionKind::Null => {
                self.emit(Opcode::Null, &[], pos);
            }
            ExpressionKind::StringLit(s) => {
                let v = self.vm.box_string(s);
                let idx = self.add_constant(v);
                self.emit(Opcode::Constant, &[idx as u64], pos);
            }
            ExpressionKind::StringInterp(parts) => {
                self.compile_string_interp(parts, pos)?;
            }
            ExpressionKind::This => {
                self.emit(Opcode::GetThis, &[], pos);
            }
            ExpressionKind::Ident(name) => {
                let symbol = self
                    .symbols
                    .resolve(name)
                    .ok_or_else(|| EngineError::compilation(format!("undefined name: {name}"), pos.clone()))?;
                self.emit_get(&symbol, pos);
            }
            ExpressionKind::Array(items) => {
                for item in items {
                    self.compile_expression(item)?;
                }
                self.emit(Opcode::Array, &[items.len() as u64], pos);
            }
            ExpressionKind::MapLiteral(pairs) => {
                // MAP_START allocates the map and pushes it onto the `this`
                // stack *before* any value expression runs, so a method
                // literal among the pairs can capture `this` via GET_THIS
                // while the map is still under construction (spec.md §4.5,
                // §3 "This stack").
                self.emit(Opcode::MapStart, &[pairs.len() as u64], pos.clone());
                for (k, v) in pairs {
                    self.compile_expression(k)?;
                    self.compile_expression(v)?;
                }
                self.emit(Opcode::MapEnd, &[pairs.len() as u64], pos);
            }
            ExpressionKind::Prefix { op, right } => {
                self.compile_expression(right)?;
                self.emit(
                    match op {
                        PrefixOp::Negate => Opcode::Minus,
                        PrefixOp::Not => Opcode::Bang,
                    },
                    &[],
                    pos,
                );
            }
            ExpressionKind::Infix { op, left, right } => {
                // The instruction set has no LESS_THAN/LESS_THAN_EQUAL; `a < b`
                // compiles to `b > a` by swapping evaluation order, matching
                // the original compiler's approach to the same gap.
                if matches!(op, InfixOp::Lt | InfixOp::LtEq) {
                    self.compile_expression(right)?;
                    self.compile_expression(left)?;
                } else {
                    self.compile_expression(left)?;
                    self.compile_expression(right)?;
                }
                self.emit(infix_opcode(*op), &[], pos);
            }
            ExpressionKind::Logical { op, left, right } => {
                self.compile_logical(*op, left, right, pos)?;
            }
            ExpressionKind::Assign { target, value, is_postfix } => {
                self.compile_assign(target, value, *is_postfix, pos)?;
            }
            ExpressionKind::Index { target, index } => {
                self.compile_expression(target)?;
                self.compile_expression(index)?;
                self.emit(Opcode::GetIndex, &[], pos);
            }
            ExpressionKind::Call { callee, args } => {
                self.compile_expression(callee)?;
                for arg in args {
                    self.compile_expression(arg)?;
                }
                self.emit(Opcode::Call, &[args.len() as u64], pos);
            }
            ExpressionKind::FunctionLit { name, params, body } => {
                self.compile_function_lit(name.as_deref(), params, body, pos)?;
            }
            ExpressionKind::Ternary {
                condition,
                when_true,
                when_false,
            } => {
                self.compile_expression(condition)?;
                let jump_false = self.emit(Opcode::JumpIfFalse, &[0], pos.clone());
                self.compile_expression(when_true)?;
                let jump_end = self.emit(Opcode::Jump, &[0], pos.clone());
                let else_start = self.current_pos();
                self.patch_jump(jump_false, else_start);
                self.compile_expression(when_false)?;
                let end = self.current_pos();
                self.patch_jump(jump_end, end);
            }
        }
        Ok(())
    }

    /// Short-circuiting `&&`/`||`: the left operand's value survives as the
    /// overall result when it already decides the outcome, otherwise the
    /// right operand is evaluated and becomes the result (spec.md §4.3's
    /// `Logical` node, kept out of `Infix` for exactly this reason).
    fn compile_logical(
        &mut self,
        op: LogicalOp,
        left: &Expression,
        right: &Expression,
        pos: SourcePosition,
    ) -> Result<(), EngineError> {
        self.compile_expression(left)?;
        self.emit(Opcode::Dup, &[], pos.clone());
        let short_circuit = match op {
            LogicalOp::And => self.emit(Opcode::JumpIfFalse, &[0], pos.clone()),
            LogicalOp::Or => self.emit(Opcode::JumpIfTrue, &[0], pos.clone()),
        };
        self.emit(Opcode::Pop, &[], pos.clone());
        self.compile_expression(right)?;
        let end = self.current_pos();
        self.patch_jump(short_circuit, end);
        Ok(())
    }

    fn compile_string_interp(&mut self, parts: &[StringPart], pos: SourcePosition) -> Result<(), EngineError> {
        let mut first = true;
        for part in parts {
            match part {
                StringPart::Literal(s) => {
                    let v = self.vm.box_string(s);
                    let idx = self.add_constant(v);
                    self.emit(Opcode::Constant, &[idx as u64], pos.clone());
                }
                StringPart::Splice(expr) => self.compile_expression(expr)?,
            }
            if !first {
                self.emit(Opcode::Add, &[], pos.clone());
            }
            first = false;
        }
        if parts.is_empty() {
            let v = self.vm.box_string("");
            let idx = self.add_constant(v);
            self.emit(Opcode::Constant, &[idx as u64], pos);
        }
        Ok(())
    }

    fn compile_assign(
        &mut self,
        target: &Expression,
        value: &Expression,
        is_postfix: bool,
        pos: SourcePosition,
    ) -> Result<(), EngineError> {
        match &target.kind {
            ExpressionKind::Ident(name) => {
                let symbol = self
                    .symbols
                    .resolve(name)
                    .ok_or_else(|| EngineError::compilation(format!("undefined name: {name}"), pos.clone()))?;
                // `x++`/`x--` yield the pre-increment value: read it onto the
                // stack first, then compute and store the new value on top
                // of it, leaving the old value as the expression's result
                // once the store pops the new one back off (spec.md §4.2).
                if is_postfix {
                    self.emit_get(&symbol, pos.clone());
                }
                self.compile_expression(value)?;
                if !is_postfix {
                    self.emit(Opcode::Dup, &[], pos.clone());
                }
                match symbol.scope {
                    SymbolScope::ModuleGlobal => self.emit(Opcode::SetModuleGlobal, &[symbol.index as u64], pos),
                    SymbolScope::Local => self.emit(Opcode::SetLocal, &[symbol.index as u64], pos),
                    _ => {
                        return Err(EngineError::compilation(
                            format!("{name} cannot be reassigned"),
                            pos,
                        ))
                    }
                };
                Ok(())
            }
            ExpressionKind::Index { target: base, index } => {
                self.compile_expression(base)?;
                self.compile_expression(index)?;
                self.compile_expression(value)?;
                self.emit(Opcode::SetIndex, &[], pos.clone());
                // SET_INDEX consumes all three operands and leaves the
                // stack empty; re-evaluating `value` here to yield it as
                // the assignment expression's result would duplicate any
                // side effects, so `a[i] = v` used as a sub-expression
                // yields `null` instead (a deliberate simplification).
                self.emit(Opcode::Null, &[], pos);
                Ok(())
            }
            _ => Err(EngineError::compilation("invalid assignment target", pos)),
        }
    }

    fn compile_function_lit(
        &mut self,
        name: Option<&str>,
        params: &[String],
        body: &[Statement],
        pos: SourcePosition,
    ) -> Result<(), EngineError> {
        self.scopes.push(CompilationScope::new());
        let outer_symbols = std::mem::replace(&mut self.symbols, SymbolTable::new_module_scope());
        self.symbols = SymbolTable::new_enclosed(outer_symbols);
        if let Some(n) = name {
            self.symbols.define_function_name(n);
        }
        self.symbols.define_this();
        for p in params {
            self.symbols
                .define(p)
                .map_err(|e| EngineError::compilation(e, pos.clone()))?;
        }
        for s in body {
            self.compile_statement(s)?;
        }
        // Every path falls off the end returns null, matching spec.md
        // §4.3's "implicit `return null`" rule.
        self.emit(Opcode::Return, &[], pos.clone());

        let free_symbols = std::mem::take(&mut self.symbols.free_symbols);
        let num_locals = self.symbols.num_locals();
        let restored = self.symbols.pop().expect("function scopes are always enclosed");
        self.symbols = restored;

        // Free variables are pushed by the enclosing scope right before
        // `FUNCTION`, in capture order, so the VM can slice them off the
        // operand stack (spec.md §4.5's `FUNCTION` opcode).
        for free in &free_symbols {
            self.emit_get_free_source(free, pos.clone());
        }

        let scope = self.scopes.pop().expect("pushed a scope for this function");
        let function = FunctionObj {
            name: name.map(Rc::from),
            bytecode: Rc::from(scope.bytecode.into_boxed_slice()),
            positions: Rc::from(scope.positions.into_boxed_slice()),
            num_locals,
            num_args: params.len(),
            free_vars: Default::default(),
        };
        let ptr = self.vm.alloc(ObjectData::Function(function));
        let template = unsafe { Value::from_allocated(ptr) };
        let const_idx = self.add_constant(template);
        self.emit(
            Opcode::Function,
            &[const_idx as u64, free_symbols.len() as u64],
            pos,
        );
        Ok(())
    }

    /// Re-resolves a captured symbol in the *enclosing* scope so the right
    /// `GET_LOCAL`/`GET_FREE` is emitted just before `FUNCTION` packages it
    /// up as one of the new closure's free variables.
    fn emit_get_free_source(&mut self, symbol: &crate::symbol_table::Symbol, pos: SourcePosition) {
        match symbol.scope {
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index as u64], pos),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index as u64], pos),
            SymbolScope::Function => self.emit(Opcode::CurrentFunction, &[], pos),
            // `this` is always captured from the *immediately* enclosing
            // scope's `this` stack, never recursed through further free
            // capture (spec.md §4.4 rule 2 only walks the current
            // function's own blocks before converting to Free).
            SymbolScope::This => self.emit(Opcode::GetThis, &[], pos),
            SymbolScope::ModuleGlobal | SymbolScope::ApeGlobal => {
                unreachable!("globals are resolved directly, never captured as free")
            }
        };
    }
}

fn infix_opcode(op: InfixOp) -> Opcode {
    match op {
        InfixOp::Add => Opcode::Add,
        InfixOp::Sub => Opcode::Sub,
        InfixOp::Mul => Opcode::Mul,
        InfixOp::Div => Opcode::Div,
        InfixOp::Mod => Opcode::Mod,
        InfixOp::Eq => Opcode::Equal,
        InfixOp::NotEq => Opcode::NotEqual,
        InfixOp::Lt => Opcode::GreaterThan, // operands are swapped by the parser's left/right order; LT(a,b) == GT(b,a)
        InfixOp::LtEq => Opcode::GreaterThanEqual,
        InfixOp::Gt => Opcode::GreaterThan,
        InfixOp::GtEq => Opcode::GreaterThanEqual,
        InfixOp::Compare => Opcode::Compare,
        InfixOp::BitAnd => Opcode::And,
        InfixOp::BitOr => Opcode::Or,
        InfixOp::BitXor => Opcode::Xor,
        InfixOp::Shl => Opcode::Lshift,
        InfixOp::Shr => Opcode::Rshift,
    }
}

/// Joins an `import` path against the directory the importing file is
/// considered to live in, so a relative `import "./sibling"` resolves no
/// matter how deep the import chain is. A path with no configured directory
/// (the top-level script, unless [`Compiler::with_source_dir`] set one)
/// resolves against the current directory unchanged.
fn resolve_relative(current_dir: &Option<String>, path: &str) -> String {
    match current_dir {
        Some(dir) if !dir.is_empty() => format!("{dir}/{path}"),
        _ => path.to_string(),
    }
}

/// The directory component of an already-canonicalized import path, for
/// seeding the nested import's own `current_dir` (so *its* relative imports
/// resolve against where it lives, not where the top-level script does).
fn parent_dir(canonical: &str) -> Option<String> {
    canonical.rsplit_once('/').map(|(dir, _)| dir.to_string())
}

/// Collapses `./` and `../` segments and strips a trailing `.ape`, matching
/// the original compiler's import canonicalization so two different
/// relative spellings of the same module resolve to one cache entry.
pub fn canonicalize_import_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.trim_end_matches(".ape").split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_relative_import_paths() {
        assert_eq!(canonicalize_import_path("./a/../b.ape"), "b");
        assert_eq!(canonicalize_import_path("a/b/c.ape"), "a/b/c");
    }
}
