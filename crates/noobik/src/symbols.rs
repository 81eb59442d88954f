//! Scoped symbol table with storage layout.
//!
//! Scopes form a tree rooted at the program-global scope (id 1). Symbols and
//! scopes live in arenas owned by [`SymbolTable`] and are addressed by dense
//! ids; parent links are id fields, so there are no pointer cycles.
//!
//! The table also owns the storage model: stack offsets for locals and
//! parameters (relative to fp), DRAM offsets for globals, and KRAM offsets
//! for constants. Locals grow downward: declaring a local advances the
//! enclosing function scope's `local_offset` cursor by the symbol's size and
//! the new cursor value becomes the symbol's offset, so the slot's top
//! address is `fp + offset`. Parameters grow upward from `fp + 8`, past the
//! saved fp and the return address.

use ahash::AHashMap;

use crate::diagnostics::Diagnostic;

/// Index of a scope. Ids are dense, assigned in declaration order, and id 1
/// is the program-global scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

/// The program-global scope.
pub const GLOBAL_SCOPE: ScopeId = ScopeId(1);

impl ScopeId {
    /// The numeric id as printed in CFG entry labels (`scope:<id>`).
    #[inline]
    pub fn id(self) -> u32 {
        self.0
    }

    pub fn from_id(id: u32) -> Self {
        Self(id)
    }

    fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

/// Index of a symbol in the table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

impl SymbolId {
    fn new(index: usize) -> Self {
        Self(index.try_into().expect("symbol table too large"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
}

/// A lexical scope.
#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    /// Function name when `kind == Function`.
    pub name: Option<String>,
    pub parent: Option<ScopeId>,
    /// Nesting depth; the global scope is level 0.
    pub level: u32,
    /// Next-free top-address for a local, relative to fp. Starts at 0 and
    /// decreases; after declaring locals it equals the lowest offset in use,
    /// so the frame size is `-local_offset`.
    pub local_offset: i32,
    /// Next-free parameter slot relative to fp. Starts at +8 (past the saved
    /// fp and the return address) and increases.
    pub param_offset: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SymbolKind {
    Global,
    Local,
    Parameter,
    Function,
    Constant,
}

/// A declared name.
///
/// `offset` depends on the kind: negative from fp for locals, positive from
/// fp for parameters, the DRAM offset for globals, 0 for functions and
/// constants. `address` is the absolute segment offset for globals and
/// constants.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub data_type: String,
    pub is_array: bool,
    pub array_size: u32,
    pub scope: ScopeId,
    pub size: u32,
    pub offset: i32,
    pub address: u32,
    pub declared: bool,
    pub initialized: bool,
    pub constant: bool,
    pub used: bool,
    pub modified: bool,
    pub param_count: usize,
    pub param_types: Vec<String>,
    pub return_type: Option<String>,
    pub line: u32,
}

impl Symbol {
    /// Locals and parameters live in the stack frame.
    pub fn is_stack_resident(&self) -> bool {
        matches!(self.kind, SymbolKind::Local | SymbolKind::Parameter)
    }
}

/// Byte size of a value of `data_type`. The backend is word-oriented: only
/// `long`, `ulong` and `din` (4 value + 4 runtime tag) take a double word.
pub fn scalar_size(data_type: &str) -> u32 {
    match data_type {
        "long" | "ulong" | "din" => 8,
        _ => 4,
    }
}

/// The scoped symbol table.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
    /// (scope, name) -> symbol, for O(1) single-scope lookup.
    index: AHashMap<(ScopeId, String), SymbolId>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    /// Next free DRAM offset for a global.
    global_cursor: u32,
    /// Next free KRAM offset for a constant.
    constant_cursor: u32,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Creates a table holding only the global scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                id: GLOBAL_SCOPE,
                kind: ScopeKind::Global,
                name: None,
                parent: None,
                level: 0,
                local_offset: 0,
                param_offset: 8,
            }],
            symbols: Vec::new(),
            index: AHashMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            global_cursor: 0,
            constant_cursor: 0,
        }
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    /// Opens a new scope under `parent` and returns its id.
    pub fn push_scope(&mut self, kind: ScopeKind, name: Option<String>, parent: ScopeId) -> ScopeId {
        let id = ScopeId(u32::try_from(self.scopes.len() + 1).expect("scope table too large"));
        let level = self.scope(parent).level + 1;
        self.scopes.push(Scope {
            id,
            kind,
            name,
            parent: Some(parent),
            level,
            local_offset: 0,
            param_offset: 8,
        });
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter()
    }

    /// The scope of the function named `name`, if one was declared.
    pub fn function_scope(&self, name: &str) -> Option<ScopeId> {
        self.scopes
            .iter()
            .find(|s| s.kind == ScopeKind::Function && s.name.as_deref() == Some(name))
            .map(|s| s.id)
    }

    /// Walks up from `scope` to the nearest scope that owns frame storage:
    /// the enclosing function scope, or the global scope at top level.
    fn storage_scope(&self, scope: ScopeId) -> ScopeId {
        let mut cur = scope;
        loop {
            let s = self.scope(cur);
            match s.kind {
                ScopeKind::Function | ScopeKind::Global => return cur,
                ScopeKind::Block => cur = s.parent.expect("block scope has a parent"),
            }
        }
    }

    /// Frame size in bytes for a function scope: locals grow downward, so
    /// the required frame is simply the negated cursor, clamped to zero.
    pub fn frame_size(&self, function_scope: ScopeId) -> u32 {
        let lo = self.scope(function_scope).local_offset;
        if lo >= 0 { 0 } else { (-lo) as u32 }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Resolves `name` walking the scope chain from `from` to global.
    pub fn lookup(&self, name: &str, from: ScopeId) -> Option<SymbolId> {
        let mut cur = Some(from);
        while let Some(scope_id) = cur {
            if let Some(&sym) = self.index.get(&(scope_id, name.to_owned())) {
                return Some(sym);
            }
            cur = self.scope(scope_id).parent;
        }
        None
    }

    /// Resolves `name` in exactly one scope.
    pub fn lookup_current_scope(&self, name: &str, scope: ScopeId) -> Option<SymbolId> {
        self.index.get(&(scope, name.to_owned())).copied()
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// All symbols declared directly in `scope`, in declaration order.
    pub fn symbols_in_scope(&self, scope: ScopeId) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(move |s| s.scope == scope)
    }

    // ========================================================================
    // Declaration
    // ========================================================================

    fn insert(&mut self, symbol: Symbol) -> Option<SymbolId> {
        if self.lookup_current_scope(&symbol.name, symbol.scope).is_some() {
            // Redeclaration is the caller's diagnostic; never overwrite.
            return None;
        }
        let id = SymbolId::new(self.symbols.len());
        self.index.insert((symbol.scope, symbol.name.clone()), id);
        self.symbols.push(symbol);
        Some(id)
    }

    fn blank(name: &str, kind: SymbolKind, data_type: &str, scope: ScopeId, line: u32) -> Symbol {
        Symbol {
            name: name.to_owned(),
            kind,
            data_type: data_type.to_owned(),
            is_array: false,
            array_size: 0,
            scope,
            size: scalar_size(data_type),
            offset: 0,
            address: 0,
            declared: true,
            initialized: false,
            constant: false,
            used: false,
            modified: false,
            param_count: 0,
            param_types: Vec::new(),
            return_type: None,
            line,
        }
    }

    /// Declares a function in the global scope. Returns `None` on
    /// redeclaration.
    pub fn declare_function(
        &mut self,
        name: &str,
        param_types: Vec<String>,
        return_type: Option<String>,
        line: u32,
    ) -> Option<SymbolId> {
        let mut sym = Self::blank(name, SymbolKind::Function, "function", GLOBAL_SCOPE, line);
        sym.param_count = param_types.len();
        sym.param_types = param_types;
        sym.return_type = return_type;
        sym.size = 0;
        self.insert(sym)
    }

    /// Declares a parameter in `scope`, assigning the next positive fp
    /// offset left-to-right.
    pub fn declare_parameter(&mut self, name: &str, data_type: &str, scope: ScopeId, line: u32) -> Option<SymbolId> {
        let size = scalar_size(data_type);
        let offset = self.scope(scope).param_offset;
        let mut sym = Self::blank(name, SymbolKind::Parameter, data_type, scope, line);
        sym.offset = offset;
        sym.initialized = true;
        let id = self.insert(sym)?;
        self.scope_mut(scope).param_offset = offset + size as i32;
        Some(id)
    }

    /// Declares a variable in `scope`. Top-level declarations become globals
    /// with monotonically increasing DRAM offsets (`address == offset`);
    /// anything else becomes a frame local of the enclosing function. Block
    /// scopes delegate slot allocation to the function scope so one frame
    /// covers every nested block.
    pub fn declare_variable(
        &mut self,
        name: &str,
        data_type: &str,
        is_array: bool,
        array_size: u32,
        scope: ScopeId,
        line: u32,
    ) -> Option<SymbolId> {
        let element = scalar_size(data_type);
        let size = if is_array { element * array_size } else { element };
        let storage = self.storage_scope(scope);

        let mut sym = Self::blank(name, SymbolKind::Local, data_type, scope, line);
        sym.is_array = is_array;
        sym.array_size = array_size;
        sym.size = size;

        if self.scope(storage).kind == ScopeKind::Global {
            sym.kind = SymbolKind::Global;
            sym.offset = self.global_cursor as i32;
            sym.address = self.global_cursor;
            let id = self.insert(sym)?;
            self.global_cursor += size;
            Some(id)
        } else {
            let offset = self.scope(storage).local_offset - size as i32;
            sym.offset = offset;
            let id = self.insert(sym)?;
            self.scope_mut(storage).local_offset = offset;
            Some(id)
        }
    }

    /// Declares a constant. Constants live in the read-only KRAM segment and
    /// keep offset 0; only the absolute address is meaningful.
    pub fn declare_constant(&mut self, name: &str, data_type: &str, scope: ScopeId, line: u32) -> Option<SymbolId> {
        let size = scalar_size(data_type);
        let mut sym = Self::blank(name, SymbolKind::Constant, data_type, scope, line);
        sym.constant = true;
        sym.initialized = true;
        sym.address = self.constant_cursor;
        let id = self.insert(sym)?;
        self.constant_cursor += size;
        Some(id)
    }

    // ========================================================================
    // Audits
    // ========================================================================

    /// Issues a warning for every frame-resident symbol that was never read.
    /// Runs once after both analysis passes.
    pub fn audit_unused(&mut self) {
        let unused: Vec<Diagnostic> = self
            .symbols
            .iter()
            .filter(|s| s.is_stack_resident() && !s.used)
            .map(|s| {
                Diagnostic::new(
                    crate::diagnostics::DiagnosticKind::Warning,
                    format!("variable '{}' is never used", s.name),
                    s.line,
                )
            })
            .collect();
        self.warnings.extend(unused);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_scope_is_id_one() {
        let table = SymbolTable::new();
        assert_eq!(table.scope(GLOBAL_SCOPE).id.id(), 1);
        assert_eq!(table.scope(GLOBAL_SCOPE).kind, ScopeKind::Global);
    }

    #[test]
    fn local_offsets_grow_downward() {
        let mut table = SymbolTable::new();
        let f = table.push_scope(ScopeKind::Function, Some("f".to_owned()), GLOBAL_SCOPE);
        let x = table.declare_variable("x", "int", false, 0, f, 1).unwrap();
        let y = table.declare_variable("y", "long", false, 0, f, 2).unwrap();
        assert_eq!(table.symbol(x).offset, -4);
        assert_eq!(table.symbol(y).offset, -12);
        assert_eq!(table.frame_size(f), 12);
    }

    #[test]
    fn parameter_offsets_start_past_saved_frame() {
        let mut table = SymbolTable::new();
        let f = table.push_scope(ScopeKind::Function, Some("f".to_owned()), GLOBAL_SCOPE);
        let a = table.declare_parameter("a", "int", f, 1).unwrap();
        let b = table.declare_parameter("b", "long", f, 1).unwrap();
        let c = table.declare_parameter("c", "int", f, 1).unwrap();
        assert_eq!(table.symbol(a).offset, 8);
        assert_eq!(table.symbol(b).offset, 12);
        assert_eq!(table.symbol(c).offset, 20);
    }

    #[test]
    fn globals_get_monotonic_addresses() {
        let mut table = SymbolTable::new();
        let a = table
            .declare_variable("a", "int", true, 8, GLOBAL_SCOPE, 1)
            .unwrap();
        let b = table.declare_variable("b", "int", false, 0, GLOBAL_SCOPE, 2).unwrap();
        assert_eq!(table.symbol(a).address, 0);
        assert_eq!(table.symbol(a).size, 32);
        assert_eq!(table.symbol(b).address, 32);
        assert_eq!(table.symbol(b).offset, 32);
    }

    #[test]
    fn redeclaration_returns_none() {
        let mut table = SymbolTable::new();
        let f = table.push_scope(ScopeKind::Function, Some("f".to_owned()), GLOBAL_SCOPE);
        assert!(table.declare_variable("x", "int", false, 0, f, 1).is_some());
        assert!(table.declare_variable("x", "int", false, 0, f, 2).is_none());
    }

    #[test]
    fn lookup_walks_the_scope_chain() {
        let mut table = SymbolTable::new();
        let g = table.declare_variable("g", "int", false, 0, GLOBAL_SCOPE, 1).unwrap();
        let f = table.push_scope(ScopeKind::Function, Some("f".to_owned()), GLOBAL_SCOPE);
        let inner = table.push_scope(ScopeKind::Block, None, f);
        assert_eq!(table.lookup("g", inner), Some(g));
        assert_eq!(table.lookup("missing", inner), None);
    }

    #[test]
    fn block_locals_share_the_function_frame() {
        let mut table = SymbolTable::new();
        let f = table.push_scope(ScopeKind::Function, Some("f".to_owned()), GLOBAL_SCOPE);
        let block = table.push_scope(ScopeKind::Block, None, f);
        table.declare_variable("x", "int", false, 0, f, 1).unwrap();
        let y = table.declare_variable("y", "int", false, 0, block, 2).unwrap();
        assert_eq!(table.symbol(y).offset, -8);
        assert_eq!(table.frame_size(f), 8);
    }
}
