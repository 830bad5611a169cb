//! Symbol resolution (spec.md §4.4): six storage classes, free-variable
//! capture across nested function scopes, and block-scoped shadowing
//! within a function.

use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    ModuleGlobal,
    Local,
    ApeGlobal,
    Free,
    Function,
    This,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: Rc<str>,
    pub scope: SymbolScope,
    pub index: usize,
}

/// One lexical block within a function body. Blocks nest (`if`/`while`/`for`
/// bodies each push one); names defined in an inner block shadow the same
/// name in an outer block without consuming a new local slot for unrelated
/// names, since locals are allocated per-function, not per-block.
struct BlockScope {
    symbols: HashMap<Rc<str>, Symbol>,
}

/// One function body's worth of symbol resolution. Nested function
/// literals get their own `SymbolTable` linked to their enclosing one via
/// `outer`, which is how free-variable capture walks upward.
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    blocks: Vec<BlockScope>,
    pub free_symbols: Vec<Symbol>,
    num_locals: usize,
    is_module_scope: bool,
    /// Whether redefining an existing module-global name is a compile
    /// error (script mode) or silently allowed (REPL mode, so re-running
    /// a line that redeclares `const x = ...` doesn't fail — spec.md §6).
    allow_redefinition: bool,
}

impl SymbolTable {
    pub fn new_module_scope() -> SymbolTable {
        SymbolTable {
            outer: None,
            blocks: vec![BlockScope {
                symbols: HashMap::new(),
            }],
            free_symbols: Vec::new(),
            num_locals: 0,
            is_module_scope: true,
            allow_redefinition: false,
        }
    }

    pub fn with_redefinition_allowed(mut self, allowed: bool) -> Self {
        self.allow_redefinition = allowed;
        self
    }

    pub fn new_enclosed(outer: SymbolTable) -> SymbolTable {
        let allow_redefinition = outer.allow_redefinition;
        SymbolTable {
            outer: Some(Box::new(outer)),
            blocks: vec![BlockScope {
                symbols: HashMap::new(),
            }],
            free_symbols: Vec::new(),
            num_locals: 0,
            is_module_scope: false,
            allow_redefinition,
        }
    }

    /// Unwraps one level of function nesting, handing back the enclosing
    /// table (the compiler calls this when it finishes a function literal).
    pub fn pop(self) -> Option<SymbolTable> {
        self.outer.map(|b| *b)
    }

    pub fn push_block(&mut self) {
        self.blocks.push(BlockScope {
            symbols: HashMap::new(),
        });
    }

    pub fn pop_block(&mut self) {
        debug_assert!(self.blocks.len() > 1, "cannot pop the function's outermost block");
        self.blocks.pop();
    }

    pub fn num_locals(&self) -> usize {
        self.num_locals
    }

    /// Number of block scopes currently nested inside the current
    /// function, including its outermost block (so `1` means "directly in
    /// the function's top-level body", used to enforce that `recover` may
    /// only appear there — spec.md §4.5).
    pub fn block_depth(&self) -> usize {
        self.blocks.len()
    }

    /// Whether this table is the module's top-level scope (no enclosing
    /// function at all), as opposed to some function's own top block.
    /// `recover` is rejected outright at module scope, and separately
    /// rejected if nested inside other statements within a function
    /// (spec.md §4.5).
    pub fn is_module_global_scope(&self) -> bool {
        self.is_module_scope
    }

    /// Defines `name` in the current block. Module-scope definitions become
    /// `ModuleGlobal`s; everything else becomes a `Local` in the enclosing
    /// function's flat local slot space.
    ///
    /// Rejects `this` (a reserved identifier), names containing `::` (that
    /// syntax is reserved for referring to imported modules' symbols), and
    /// names that would shadow a host-registered global.
    pub fn define(&mut self, name: &str) -> Result<Symbol, String> {
        if name == "this" {
            return Err("\"this\" is a reserved name and cannot be redefined".to_string());
        }
        if name.contains("::") {
            return Err(format!("\"{name}\" is not a valid identifier: \"::\" is reserved for module imports"));
        }
        if self.root_has_ape_global(name) {
            return Err(format!("\"{name}\" shadows a host-registered global"));
        }
        if self.is_module_scope && !self.allow_redefinition && self.blocks[0].symbols.contains_key(name) {
            return Err(format!("\"{name}\" is already defined"));
        }
        let scope = if self.is_module_scope {
            SymbolScope::ModuleGlobal
        } else {
            SymbolScope::Local
        };
        let index = if scope == SymbolScope::ModuleGlobal {
            match self.blocks[0].symbols.get(name) {
                // Redefining in REPL mode reuses the existing slot rather
                // than leaking a fresh one on every re-declared line.
                Some(existing) => existing.index,
                None => self.blocks[0].symbols.len(),
            }
        } else {
            let i = self.num_locals;
            self.num_locals += 1;
            i
        };
        let symbol = Symbol {
            name: Rc::from(name),
            scope,
            index,
        };
        self.blocks
            .last_mut()
            .expect("a function scope always has at least one block")
            .symbols
            .insert(symbol.name.clone(), symbol.clone());
        Ok(symbol)
    }

    /// Defines an already-qualified `module::name` binding for a symbol an
    /// `import`ed file re-exports. A plain `define` rejects any name
    /// containing `::` to stop user source from spelling one out directly
    /// (the lexer never produces such an identifier from source text
    /// itself, so this is the only legitimate way such a name is created);
    /// this entry point is for the compiler's own import-aliasing, which
    /// builds the qualified name itself and needs the rest of `define`'s
    /// checks (module-scope slot reuse, host-global shadowing) unchanged.
    pub fn define_module_alias(&mut self, qualified_name: &str) -> Result<Symbol, String> {
        if self.root_has_ape_global(qualified_name) {
            return Err(format!("\"{qualified_name}\" shadows a host-registered global"));
        }
        let index = match self.blocks[0].symbols.get(qualified_name) {
            Some(existing) => existing.index,
            None => self.blocks[0].symbols.len(),
        };
        let symbol = Symbol {
            name: Rc::from(qualified_name),
            scope: SymbolScope::ModuleGlobal,
            index,
        };
        self.blocks[0].symbols.insert(symbol.name.clone(), symbol.clone());
        Ok(symbol)
    }

    fn root_has_ape_global(&self, name: &str) -> bool {
        if let Some(sym) = self.blocks[0].symbols.get(name) {
            if sym.scope == SymbolScope::ApeGlobal {
                return true;
            }
        }
        match &self.outer {
            Some(outer) => outer.root_has_ape_global(name),
            None => false,
        }
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: Rc::from(name),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.blocks[0].symbols.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    pub fn define_this(&mut self) -> Symbol {
        let symbol = Symbol {
            name: Rc::from("this"),
            scope: SymbolScope::This,
            index: 0,
        };
        self.blocks[0].symbols.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    pub fn define_ape_global(&mut self, name: &str, index: usize) -> Symbol {
        let symbol = Symbol {
            name: Rc::from(name),
            scope: SymbolScope::ApeGlobal,
            index,
        };
        self.blocks[0].symbols.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Resolves `name` in this table's own blocks (innermost first), and
    /// if not found, recurses into the enclosing function — capturing it
    /// as a `Free` symbol when found there (spec.md §4.4's capture rule).
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        for block in self.blocks.iter().rev() {
            if let Some(sym) = block.symbols.get(name).cloned() {
                // `this` is never read directly even when defined in the
                // current function: it must reach the function body through
                // a free-variable capture, since the value it refers to
                // only exists on the VM's `this` stack while the enclosing
                // map literal is under construction (spec.md §4.4 rule 2).
                return Some(if sym.scope == SymbolScope::This {
                    self.define_free(sym)
                } else {
                    sym
                });
            }
        }
        let outer = self.outer.as_mut()?;
        let resolved = outer.resolve(name)?;
        match resolved.scope {
            SymbolScope::ModuleGlobal | SymbolScope::ApeGlobal => Some(resolved),
            _ => Some(self.define_free(resolved)),
        }
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free_symbols.push(original.clone());
        let symbol = Symbol {
            name: original.name,
            scope: SymbolScope::Free,
            index: self.free_symbols.len() - 1,
        };
        self.blocks[0].symbols.insert(symbol.name.clone(), symbol.clone());
        symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_scope_defines_module_globals() {
        let mut table = SymbolTable::new_module_scope();
        let sym = table.define("x").expect("x should define cleanly");
        assert_eq!(sym.scope, SymbolScope::ModuleGlobal);
        assert_eq!(sym.index, 0);
    }

    #[test]
    fn nested_function_captures_outer_local_as_free() {
        let mut outer = SymbolTable::new_enclosed(SymbolTable::new_module_scope());
        outer.define("a");
        let mut inner = SymbolTable::new_enclosed(outer);
        let resolved = inner.resolve("a").expect("a should resolve through closure capture");
        assert_eq!(resolved.scope, SymbolScope::Free);
        assert_eq!(inner.free_symbols.len(), 1);
    }

    #[test]
    fn block_shadowing_does_not_consume_extra_local_slots() {
        let mut table = SymbolTable::new_enclosed(SymbolTable::new_module_scope());
        table.define("x");
        table.push_block();
        table.define("x");
        table.pop_block();
        assert_eq!(table.num_locals(), 2);
    }
}
