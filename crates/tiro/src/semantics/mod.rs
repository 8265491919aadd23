//! Semantic analysis: scopes, symbol resolution, structural checks and
//! expression value types.
//!
//! The passes run in a fixed order over the immutable AST, accumulating side
//! tables keyed by node id:
//!
//! 1. [`scope_builder::build_scopes`] creates the scope tree and registers a
//!    symbol for every declaration.
//! 2. [`scope_builder::resolve_symbols`] binds every variable expression to a
//!    symbol, activates symbols at their definition site and flags captures.
//! 3. [`checker::check_structure`] verifies structural rules (assignment
//!    targets, `break`/`continue` placement, const initialization).
//! 4. [`types::analyze_types`] assigns each expression a value type and
//!    diagnoses value positions fed by non-value expressions.

pub mod checker;
pub mod scope_builder;
pub mod symbol_table;
pub mod types;

pub use symbol_table::{ScopeId, ScopeKind, Symbol, SymbolId, SymbolKind, SymbolTable};
pub use types::ExprType;

use ahash::AHashMap;

use crate::ast::AstId;

/// Side tables produced by the semantic passes.
#[derive(Debug, Default)]
pub struct SemanticInfo {
    pub symbols: SymbolTable,
    /// The scope for the compiled file's own declarations.
    pub file_scope: Option<ScopeId>,
    /// The surrounding scope of every scoping node (file, function bodies,
    /// blocks, loops), keyed by the node that introduced it.
    pub node_scopes: AHashMap<AstId, ScopeId>,
    /// Symbol registered for a declaration site. Tuple bindings register one
    /// entry per name, in binding order.
    pub decl_symbols: AHashMap<AstId, Vec<SymbolId>>,
    /// Resolved symbol of every variable expression.
    pub var_symbols: AHashMap<AstId, SymbolId>,
    /// Value type of every expression.
    pub expr_types: AHashMap<AstId, ExprType>,
}

impl SemanticInfo {
    #[must_use]
    pub fn symbol_of_var(&self, id: AstId) -> Option<SymbolId> {
        self.var_symbols.get(&id).copied()
    }

    #[must_use]
    pub fn symbols_of_decl(&self, id: AstId) -> &[SymbolId] {
        self.decl_symbols.get(&id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn expr_type(&self, id: AstId) -> ExprType {
        self.expr_types.get(&id).copied().unwrap_or(ExprType::Value)
    }
}
