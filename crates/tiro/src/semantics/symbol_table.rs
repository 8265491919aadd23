//! Scope tree and symbol storage.
//!
//! Scopes and symbols live in id-indexed vectors owned by [`SymbolTable`];
//! all edges (parent scope, declaring scope) are ids, so the parent-pointer
//! cycle of a scope tree never needs owning back references. Each scope keeps
//! its symbols in insertion order next to a name index for duplicate
//! detection and lookup.

use ahash::AHashMap;
use strum::{Display, IntoStaticStr};

use crate::{ast::AstId, intern::InternedString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

/// What kind of construct introduced a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ScopeKind {
    /// Top level scope; owns nothing but the file scopes.
    Global,
    /// One per compiled file (module).
    File,
    /// Parameters of a function; parent of the function's body scope.
    Parameters,
    /// Variables introduced in a `for` statement header.
    ForStmtDecls,
    /// A function body.
    FunctionBody,
    /// The body of a loop.
    LoopBody,
    /// Any block expression.
    Block,
}

/// What a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum SymbolKind {
    Import,
    Function,
    /// Variable at module scope.
    ModuleVar,
    Parameter,
    /// Variable local to a function.
    LocalVar,
}

#[derive(Debug)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name: InternedString,
    /// The declaring node (binding, parameter, function or import).
    pub decl: AstId,
    pub scope: ScopeId,
    pub is_const: bool,
    /// A symbol becomes active at its definition site; references before
    /// that point in the same scope chain are use-before-init errors.
    pub active: bool,
    /// Set when a nested function references the symbol. Captured symbols
    /// are allocated in a closure environment instead of a register.
    pub captured: bool,
    /// Set for module-level symbols listed in the module's export table.
    pub exported: bool,
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    /// Nesting level; the global scope has depth 0.
    pub depth: u32,
    /// The function declaration node enclosing this scope, if any. Used to
    /// detect captures: a reference from a different function than the
    /// symbol's owning function crosses a closure boundary.
    pub function: Option<AstId>,
    symbols: Vec<SymbolId>,
    by_name: AHashMap<InternedString, SymbolId>,
}

impl Scope {
    /// Symbols in insertion order.
    #[must_use]
    pub fn symbols(&self) -> &[SymbolId] {
        &self.symbols
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self::default();
        table.create_scope(ScopeKind::Global, None, None);
        table
    }

    #[must_use]
    pub fn global_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn create_scope(&mut self, kind: ScopeKind, parent: Option<ScopeId>, function: Option<AstId>) -> ScopeId {
        let depth = parent.map_or(0, |p| self.scope(p).depth + 1);
        let id = ScopeId(u32::try_from(self.scopes.len()).expect("scope id overflow"));
        self.scopes.push(Scope {
            kind,
            parent,
            depth,
            function,
            symbols: Vec::new(),
            by_name: AHashMap::new(),
        });
        id
    }

    #[must_use]
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    #[must_use]
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    /// Inserts a new symbol into `scope`. Fails with the previous symbol id
    /// when the name is already taken in this exact scope.
    pub fn insert(
        &mut self,
        scope: ScopeId,
        kind: SymbolKind,
        name: InternedString,
        decl: AstId,
        is_const: bool,
    ) -> Result<SymbolId, SymbolId> {
        if name.is_valid()
            && let Some(&existing) = self.scope(scope).by_name.get(&name)
        {
            return Err(existing);
        }
        let id = SymbolId(u32::try_from(self.symbols.len()).expect("symbol id overflow"));
        self.symbols.push(Symbol {
            kind,
            name,
            decl,
            scope,
            is_const,
            active: false,
            captured: false,
            exported: false,
        });
        let entry = &mut self.scopes[scope.0 as usize];
        entry.symbols.push(id);
        if name.is_valid() {
            entry.by_name.insert(name, id);
        }
        Ok(id)
    }

    /// Searches only `scope` itself.
    #[must_use]
    pub fn find_local(&self, scope: ScopeId, name: InternedString) -> Option<SymbolId> {
        self.scope(scope).by_name.get(&name).copied()
    }

    /// Searches `scope` and all ancestors. Returns the symbol together with
    /// the scope it was found in.
    #[must_use]
    pub fn find(&self, scope: ScopeId, name: InternedString) -> Option<(SymbolId, ScopeId)> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(symbol) = self.find_local(id, name) {
                return Some((symbol, id));
            }
            current = self.scope(id).parent;
        }
        None
    }

    pub fn scope_ids(&self) -> impl Iterator<Item = ScopeId> + '_ {
        (0..self.scopes.len()).map(|i| ScopeId(i as u32))
    }

    /// The closest enclosing function of `scope`, if any.
    #[must_use]
    pub fn enclosing_function(&self, scope: ScopeId) -> Option<AstId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(function) = self.scope(id).function {
                return Some(function);
            }
            current = self.scope(id).parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::StringTable;

    #[test]
    fn duplicate_names_are_rejected_per_scope() {
        let mut strings = StringTable::new();
        let mut table = SymbolTable::new();
        let file = table.create_scope(ScopeKind::File, Some(table.global_scope()), None);
        let name = strings.insert("x");
        let first = table
            .insert(file, SymbolKind::ModuleVar, name, AstId(1), false)
            .unwrap();
        let err = table
            .insert(file, SymbolKind::ModuleVar, name, AstId(2), false)
            .unwrap_err();
        assert_eq!(first, err);

        // Same name in a child scope shadows instead.
        let block = table.create_scope(ScopeKind::Block, Some(file), None);
        let shadow = table
            .insert(block, SymbolKind::LocalVar, name, AstId(3), false)
            .unwrap();
        assert_ne!(shadow, first);
        assert_eq!(table.find(block, name), Some((shadow, block)));
        assert_eq!(table.find(file, name), Some((first, file)));
    }

    #[test]
    fn find_walks_ancestors() {
        let mut strings = StringTable::new();
        let mut table = SymbolTable::new();
        let file = table.create_scope(ScopeKind::File, Some(table.global_scope()), None);
        let inner = table.create_scope(ScopeKind::Block, Some(file), None);
        let name = strings.insert("outer");
        let symbol = table
            .insert(file, SymbolKind::ModuleVar, name, AstId(1), true)
            .unwrap();
        assert_eq!(table.find(inner, name), Some((symbol, file)));
        assert_eq!(table.find_local(inner, name), None);
    }
}
