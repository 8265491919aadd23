//! Scope construction and symbol resolution.
//!
//! `build_scopes` walks the AST once, creating a scope for every scoping
//! construct and registering a symbol for every declaration. Duplicate names
//! within one scope are diagnosed here. Every created scope is keyed by the
//! id of the node that introduced it, so the resolution pass can re-enter
//! the exact same scopes without rebuilding them.
//!
//! `resolve_symbols` walks the AST a second time in evaluation order. It
//! binds each variable expression to a symbol, diagnoses references to
//! undefined names and to symbols that are not yet active (use before
//! definition), and flags symbols referenced from nested functions as
//! captured.

use crate::{
    ast::{Binding, Decl, DeclNode, Expr, ExprNode, File, FuncDecl, Stmt, StmtNode, StringPart},
    diagnostics::Diagnostics,
    intern::StringTable,
    semantics::{
        ScopeId, ScopeKind, SemanticInfo, SymbolId, SymbolKind,
        symbol_table::SymbolTable,
    },
};

/// First pass: create scopes, register symbols.
pub fn build_scopes(file: &File, strings: &StringTable, info: &mut SemanticInfo, diagnostics: &mut Diagnostics) {
    info.symbols = SymbolTable::new();
    let file_scope = info
        .symbols
        .create_scope(ScopeKind::File, Some(info.symbols.global_scope()), None);
    info.file_scope = Some(file_scope);

    let mut builder = ScopeBuilder {
        info,
        strings,
        diagnostics,
        scope: file_scope,
        function: None,
    };
    for item in &file.items {
        builder.decl(item, true);
    }
}

struct ScopeBuilder<'a> {
    info: &'a mut SemanticInfo,
    strings: &'a StringTable,
    diagnostics: &'a mut Diagnostics,
    scope: ScopeId,
    function: Option<crate::ast::AstId>,
}

impl ScopeBuilder<'_> {
    fn insert(
        &mut self,
        kind: SymbolKind,
        name: crate::intern::InternedString,
        decl: crate::ast::AstId,
        is_const: bool,
        span: crate::span::Span,
    ) -> Option<SymbolId> {
        match self.info.symbols.insert(self.scope, kind, name, decl, is_const) {
            Ok(id) => Some(id),
            Err(_previous) => {
                let text = self.strings.try_get(name).unwrap_or("<invalid>");
                self.diagnostics
                    .error(span, format!("the name '{text}' is already declared in this scope"));
                None
            }
        }
    }

    fn with_scope(&mut self, scope: ScopeId, f: impl FnOnce(&mut Self)) {
        let previous = self.scope;
        self.scope = scope;
        f(self);
        self.scope = previous;
    }

    fn decl(&mut self, node: &DeclNode, at_file_scope: bool) {
        match &node.kind {
            Decl::Func(func) => {
                let kind = if at_file_scope {
                    SymbolKind::Function
                } else {
                    SymbolKind::LocalVar
                };
                if func.name.is_valid()
                    && let Some(symbol) = self.insert(kind, func.name, node.id, true, node.span)
                {
                    self.info.decl_symbols.insert(node.id, vec![symbol]);
                    self.info.symbols.symbol_mut(symbol).exported = func.exported;
                }
                self.func(node.id, func);
            }
            Decl::Var(var) => {
                let kind = if at_file_scope {
                    SymbolKind::ModuleVar
                } else {
                    SymbolKind::LocalVar
                };
                for binding in &var.bindings {
                    let mut symbols = Vec::new();
                    match &binding.kind {
                        Binding::Var {
                            name,
                            name_span,
                            is_const,
                            init,
                        } => {
                            if let Some(init) = init {
                                self.expr(init);
                            }
                            if name.is_valid()
                                && let Some(symbol) = self.insert(kind, *name, binding.id, *is_const, *name_span)
                            {
                                symbols.push(symbol);
                            }
                        }
                        Binding::Tuple { names, is_const, init } => {
                            if let Some(init) = init {
                                self.expr(init);
                            }
                            for (name, span) in names {
                                if name.is_valid()
                                    && let Some(symbol) = self.insert(kind, *name, binding.id, *is_const, *span)
                                {
                                    symbols.push(symbol);
                                }
                            }
                        }
                    }
                    for &symbol in &symbols {
                        self.info.symbols.symbol_mut(symbol).exported = var.exported;
                    }
                    self.info.decl_symbols.insert(binding.id, symbols);
                }
            }
            Decl::Import(import) => {
                if import.module.is_valid()
                    && let Some(symbol) = self.insert(SymbolKind::Import, import.module, node.id, true, node.span)
                {
                    self.info.decl_symbols.insert(node.id, vec![symbol]);
                    self.info.symbols.symbol_mut(symbol).exported = import.exported;
                }
            }
        }
    }

    /// Creates the parameter and body scopes of a function and descends.
    fn func(&mut self, id: crate::ast::AstId, func: &FuncDecl) {
        let params_scope = self
            .info
            .symbols
            .create_scope(ScopeKind::Parameters, Some(self.scope), Some(id));
        self.info.node_scopes.insert(id, params_scope);

        let previous_function = self.function;
        self.function = Some(id);

        self.with_scope(params_scope, |this| {
            for param in &func.params {
                if param.name.is_valid()
                    && let Some(symbol) =
                        this.insert(SymbolKind::Parameter, param.name, param.id, false, param.span)
                {
                    this.info.decl_symbols.insert(param.id, vec![symbol]);
                }
            }

            let body_scope = this
                .info
                .symbols
                .create_scope(ScopeKind::FunctionBody, Some(params_scope), Some(id));
            this.info.node_scopes.insert(func.body.id, body_scope);
            this.with_scope(body_scope, |this| match &func.body.kind {
                Expr::Block { stmts, tail } => {
                    for stmt in stmts {
                        this.stmt(stmt);
                    }
                    if let Some(tail) = tail {
                        this.expr(tail);
                    }
                }
                _ => this.expr(&func.body),
            });
        });

        self.function = previous_function;
    }

    fn stmt(&mut self, node: &StmtNode) {
        match &node.kind {
            Stmt::Assert { condition, message } => {
                self.expr(condition);
                if let Some(message) = message {
                    self.expr(message);
                }
            }
            Stmt::Decl(decl) => self.decl(decl, false),
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::While { condition, body } => {
                self.expr(condition);
                self.block(body, ScopeKind::LoopBody);
            }
            Stmt::For {
                decl,
                condition,
                step,
                body,
            } => {
                let for_scope = self
                    .info
                    .symbols
                    .create_scope(ScopeKind::ForStmtDecls, Some(self.scope), self.function);
                self.info.node_scopes.insert(node.id, for_scope);
                self.with_scope(for_scope, |this| {
                    if let Some(decl) = decl {
                        this.stmt(decl);
                    }
                    if let Some(condition) = condition {
                        this.expr(condition);
                    }
                    if let Some(step) = step {
                        this.expr(step);
                    }
                    this.block(body, ScopeKind::LoopBody);
                });
            }
            Stmt::Empty => {}
        }
    }

    /// Enters a new scope of the given kind for a block expression.
    fn block(&mut self, node: &ExprNode, kind: ScopeKind) {
        let scope = self
            .info
            .symbols
            .create_scope(kind, Some(self.scope), self.function);
        self.info.node_scopes.insert(node.id, scope);
        self.with_scope(scope, |this| match &node.kind {
            Expr::Block { stmts, tail } => {
                for stmt in stmts {
                    this.stmt(stmt);
                }
                if let Some(tail) = tail {
                    this.expr(tail);
                }
            }
            _ => this.expr_children(node),
        });
    }

    fn expr(&mut self, node: &ExprNode) {
        match &node.kind {
            Expr::Block { .. } => self.block(node, ScopeKind::Block),
            Expr::Func(func) => self.func(node.id, func),
            Expr::Var(_) => {
                // Record the surrounding scope; resolution happens later.
                self.info.node_scopes.insert(node.id, self.scope);
            }
            _ => self.expr_children(node),
        }
    }

    fn expr_children(&mut self, node: &ExprNode) {
        match &node.kind {
            Expr::Literal(_) | Expr::StringLiteral(_) | Expr::Break | Expr::Continue => {}
            Expr::Var(_) | Expr::Block { .. } | Expr::Func(_) => unreachable!("handled in expr"),
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Call { callee, args } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Member { object, .. } | Expr::TupleMember { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition);
                self.expr(then_branch);
                if let Some(else_branch) = else_branch {
                    self.expr(else_branch);
                }
            }
            Expr::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Expr::StringInterpolation(parts) => {
                for part in parts {
                    if let StringPart::Interpolation(expr) = part {
                        self.expr(expr);
                    }
                }
            }
            Expr::Tuple(items) | Expr::Array(items) | Expr::Set(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            Expr::Map(pairs) => {
                for (key, value) in pairs {
                    self.expr(key);
                    self.expr(value);
                }
            }
            Expr::Record(fields) => {
                for (_, value) in fields {
                    self.expr(value);
                }
            }
        }
    }
}

/// Second pass: bind variable expressions, track activation, flag captures.
pub fn resolve_symbols(file: &File, strings: &StringTable, info: &mut SemanticInfo, diagnostics: &mut Diagnostics) {
    // File-scope symbols are visible throughout the whole file, regardless
    // of declaration order.
    let file_scope = info.file_scope.expect("scopes must be built first");
    let symbols: Vec<SymbolId> = info.symbols.scope(file_scope).symbols().to_vec();
    for symbol in symbols {
        info.symbols.symbol_mut(symbol).active = true;
    }

    let mut resolver = Resolver {
        info,
        strings,
        diagnostics,
        scope: file_scope,
        function: None,
    };
    for item in &file.items {
        resolver.decl(item);
    }
}

struct Resolver<'a> {
    info: &'a mut SemanticInfo,
    strings: &'a StringTable,
    diagnostics: &'a mut Diagnostics,
    scope: ScopeId,
    function: Option<crate::ast::AstId>,
}

impl Resolver<'_> {
    fn with_scope(&mut self, scope: ScopeId, f: impl FnOnce(&mut Self)) {
        let previous = self.scope;
        self.scope = scope;
        f(self);
        self.scope = previous;
    }

    fn activate(&mut self, decl: crate::ast::AstId) {
        let symbols = self.info.decl_symbols.get(&decl).cloned().unwrap_or_default();
        for symbol in symbols {
            self.info.symbols.symbol_mut(symbol).active = true;
        }
    }

    fn decl(&mut self, node: &DeclNode) {
        match &node.kind {
            Decl::Func(func) => {
                // Activate before the body so the function can recurse.
                self.activate(node.id);
                self.func(node.id, func);
            }
            Decl::Var(var) => {
                for binding in &var.bindings {
                    let init = match &binding.kind {
                        Binding::Var { init, .. } | Binding::Tuple { init, .. } => init,
                    };
                    if let Some(init) = init {
                        self.expr(init);
                    }
                    self.activate(binding.id);
                }
            }
            Decl::Import(_) => self.activate(node.id),
        }
    }

    fn func(&mut self, id: crate::ast::AstId, func: &FuncDecl) {
        let params_scope = self.info.node_scopes[&id];
        let previous_function = self.function;
        self.function = Some(id);

        self.with_scope(params_scope, |this| {
            for param in &func.params {
                this.activate(param.id);
            }
            let body_scope = this.info.node_scopes[&func.body.id];
            this.with_scope(body_scope, |this| match &func.body.kind {
                Expr::Block { stmts, tail } => {
                    for stmt in stmts {
                        this.stmt(stmt);
                    }
                    if let Some(tail) = tail {
                        this.expr(tail);
                    }
                }
                _ => this.expr(&func.body),
            });
        });

        self.function = previous_function;
    }

    fn stmt(&mut self, node: &StmtNode) {
        match &node.kind {
            Stmt::Assert { condition, message } => {
                self.expr(condition);
                if let Some(message) = message {
                    self.expr(message);
                }
            }
            Stmt::Decl(decl) => self.decl(decl),
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::While { condition, body } => {
                self.expr(condition);
                self.enter_block(body);
            }
            Stmt::For {
                decl,
                condition,
                step,
                body,
            } => {
                let for_scope = self.info.node_scopes[&node.id];
                self.with_scope(for_scope, |this| {
                    if let Some(decl) = decl {
                        this.stmt(decl);
                    }
                    if let Some(condition) = condition {
                        this.expr(condition);
                    }
                    if let Some(step) = step {
                        this.expr(step);
                    }
                    this.enter_block(body);
                });
            }
            Stmt::Empty => {}
        }
    }

    fn enter_block(&mut self, node: &ExprNode) {
        let scope = self.info.node_scopes[&node.id];
        self.with_scope(scope, |this| match &node.kind {
            Expr::Block { stmts, tail } => {
                for stmt in stmts {
                    this.stmt(stmt);
                }
                if let Some(tail) = tail {
                    this.expr(tail);
                }
            }
            _ => this.expr_children(node),
        });
    }

    fn expr(&mut self, node: &ExprNode) {
        match &node.kind {
            Expr::Block { .. } => self.enter_block(node),
            Expr::Func(func) => self.func(node.id, func),
            Expr::Var(name) => self.var_expr(node, *name),
            _ => self.expr_children(node),
        }
    }

    fn var_expr(&mut self, node: &ExprNode, name: crate::intern::InternedString) {
        if node.has_error || !name.is_valid() {
            return;
        }
        let Some((symbol, _)) = self.info.symbols.find(self.scope, name) else {
            let text = self.strings.get(name);
            self.diagnostics.error(node.span, format!("undefined symbol '{text}'"));
            return;
        };

        let data = self.info.symbols.symbol(symbol);
        if !data.active {
            let text = self.strings.get(name);
            self.diagnostics.error(
                node.span,
                format!("'{text}' cannot be referenced before its definition"),
            );
            return;
        }

        // A reference that crosses a function boundary captures the symbol.
        let owner = self.info.symbols.enclosing_function(data.scope);
        let crosses_function = owner.is_some() && owner != self.function;
        if crosses_function {
            self.info.symbols.symbol_mut(symbol).captured = true;
        }

        self.info.var_symbols.insert(node.id, symbol);
    }

    fn expr_children(&mut self, node: &ExprNode) {
        match &node.kind {
            Expr::Literal(_) | Expr::StringLiteral(_) | Expr::Break | Expr::Continue => {}
            Expr::Var(_) | Expr::Block { .. } | Expr::Func(_) => unreachable!("handled in expr"),
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Call { callee, args } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Member { object, .. } | Expr::TupleMember { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition);
                self.expr(then_branch);
                if let Some(else_branch) = else_branch {
                    self.expr(else_branch);
                }
            }
            Expr::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Expr::StringInterpolation(parts) => {
                for part in parts {
                    if let StringPart::Interpolation(expr) = part {
                        self.expr(expr);
                    }
                }
            }
            Expr::Tuple(items) | Expr::Array(items) | Expr::Set(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            Expr::Map(pairs) => {
                for (key, value) in pairs {
                    self.expr(key);
                    self.expr(value);
                }
            }
            Expr::Record(fields) => {
                for (_, value) in fields {
                    self.expr(value);
                }
            }
        }
    }
}
