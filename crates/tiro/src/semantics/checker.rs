//! Structural semantic checks.
//!
//! Runs after symbol resolution. Everything here is a local, syntactic rule;
//! no type information is needed:
//!
//! - constants must be initialized at their binding
//! - `break` / `continue` only inside a loop, `return` only inside a function
//! - assignment targets must be place expressions (or, for plain `=`, a
//!   tuple of place expressions) and must not be constants, functions or
//!   imports

use crate::{
    ast::{Binding, BinaryOp, Decl, DeclNode, Expr, ExprNode, File, FuncDecl, Stmt, StmtNode, StringPart},
    diagnostics::Diagnostics,
    intern::StringTable,
    semantics::{SemanticInfo, SymbolKind},
};

pub fn check_structure(file: &File, strings: &StringTable, info: &SemanticInfo, diagnostics: &mut Diagnostics) {
    let mut checker = Checker {
        info,
        strings,
        diagnostics,
        loop_depth: 0,
        function_depth: 0,
    };
    for item in &file.items {
        checker.decl(item);
    }
}

struct Checker<'a> {
    info: &'a SemanticInfo,
    strings: &'a StringTable,
    diagnostics: &'a mut Diagnostics,
    loop_depth: u32,
    function_depth: u32,
}

impl Checker<'_> {
    fn decl(&mut self, node: &DeclNode) {
        match &node.kind {
            Decl::Func(func) => self.func(func),
            Decl::Var(var) => {
                for binding in &var.bindings {
                    let (is_const, init) = match &binding.kind {
                        Binding::Var { is_const, init, .. } | Binding::Tuple { is_const, init, .. } => (is_const, init),
                    };
                    if *is_const && init.is_none() && !binding.has_error {
                        self.diagnostics
                            .error(binding.span, "constants must be initialized at their declaration");
                    }
                    if let Some(init) = init {
                        self.expr(init);
                    }
                }
            }
            Decl::Import(_) => {}
        }
    }

    fn func(&mut self, func: &FuncDecl) {
        self.function_depth += 1;
        // Loops outside do not surround the nested function's body.
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.expr(&func.body);
        self.loop_depth = saved_loops;
        self.function_depth -= 1;
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
                self.loop_depth += 1;
                self.expr(body);
                self.loop_depth -= 1;
            }
            Stmt::For {
                decl,
                condition,
                step,
                body,
            } => {
                if let Some(decl) = decl {
                    self.stmt(decl);
                }
                if let Some(condition) = condition {
                    self.expr(condition);
                }
                self.loop_depth += 1;
                if let Some(step) = step {
                    self.expr(step);
                }
                self.expr(body);
                self.loop_depth -= 1;
            }
            Stmt::Empty => {}
        }
    }

    fn expr(&mut self, node: &ExprNode) {
        match &node.kind {
            Expr::Binary {
                op: BinaryOp::Assign,
                left,
                right,
            } => {
                self.check_assign_target(left, true);
                self.expr(right);
            }
            Expr::Break => {
                if self.loop_depth == 0 {
                    self.diagnostics.error(node.span, "'break' is only allowed inside a loop");
                }
            }
            Expr::Continue => {
                if self.loop_depth == 0 {
                    self.diagnostics
                        .error(node.span, "'continue' is only allowed inside a loop");
                }
            }
            Expr::Return(value) => {
                if self.function_depth == 0 {
                    self.diagnostics
                        .error(node.span, "'return' is only allowed inside a function");
                }
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Expr::Func(func) => self.func(func),
            _ => self.children(node),
        }
    }

    /// Verifies that `node` may be assigned to. `allow_tuple` permits a
    /// tuple of places as the outermost target of a plain assignment.
    fn check_assign_target(&mut self, node: &ExprNode, allow_tuple: bool) {
        match &node.kind {
            Expr::Var(name) => {
                let Some(symbol) = self.info.symbol_of_var(node.id) else {
                    return; // resolution already reported
                };
                let data = self.info.symbols.symbol(symbol);
                let text = self.strings.try_get(*name).unwrap_or("<invalid>");
                match data.kind {
                    SymbolKind::Function => {
                        self.diagnostics
                            .error(node.span, format!("cannot assign to the function '{text}'"));
                    }
                    SymbolKind::Import => {
                        self.diagnostics
                            .error(node.span, format!("cannot assign to the import '{text}'"));
                    }
                    _ if data.is_const => {
                        self.diagnostics
                            .error(node.span, format!("cannot assign to the constant '{text}'"));
                    }
                    _ => {}
                }
            }
            Expr::Member { object, .. } | Expr::TupleMember { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Tuple(items) if allow_tuple => {
                for item in items {
                    self.check_assign_target(item, false);
                }
            }
            _ => {
                if !node.has_error {
                    self.diagnostics
                        .error(node.span, "this expression cannot be assigned to");
                }
            }
        }
    }

    fn children(&mut self, node: &ExprNode) {
        match &node.kind {
            Expr::Literal(_) | Expr::StringLiteral(_) | Expr::Var(_) => {}
            Expr::Break | Expr::Continue | Expr::Return(_) | Expr::Func(_) => {
                unreachable!("handled in expr")
            }
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
            Expr::Block { stmts, tail } => {
                for stmt in stmts {
                    self.stmt(stmt);
                }
                if let Some(tail) = tail {
                    self.expr(tail);
                }
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
