//! Expression value types.
//!
//! Every expression is assigned one of three value types:
//!
//! - `Value`: the expression produces a value.
//! - `None`: nothing is produced (a block without a tail expression, an `if`
//!   without an else branch).
//! - `Never`: control flow diverts (`return`, `break`, `continue`, or a
//!   block/if whose ends all divert).
//!
//! Positions that require a value (operands, arguments, conditions, binding
//! initializers) are checked here; feeding them a `None` expression is a
//! diagnostic. `Never` is accepted anywhere a value is required since the
//! surrounding code never runs.

use strum::{Display, IntoStaticStr};

use crate::{
    ast::{Binding, Decl, DeclNode, Expr, ExprNode, File, FuncDecl, Stmt, StmtNode, StringPart},
    diagnostics::Diagnostics,
    semantics::SemanticInfo,
};

/// The value category of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ExprType {
    /// Produces no value; only valid where no value is required.
    None,
    /// Produces a value.
    Value,
    /// Diverts control flow and never produces a value.
    Never,
}

impl ExprType {
    /// Whether an expression of this type may stand in a value position.
    #[must_use]
    pub fn can_use_as_value(self) -> bool {
        matches!(self, Self::Value | Self::Never)
    }
}

pub fn analyze_types(file: &File, info: &mut SemanticInfo, diagnostics: &mut Diagnostics) {
    let mut analyzer = TypeAnalyzer { info, diagnostics };
    for item in &file.items {
        analyzer.decl(item);
    }
}

struct TypeAnalyzer<'a> {
    info: &'a mut SemanticInfo,
    diagnostics: &'a mut Diagnostics,
}

impl TypeAnalyzer<'_> {
    fn set(&mut self, node: &ExprNode, ty: ExprType) -> ExprType {
        self.info.expr_types.insert(node.id, ty);
        ty
    }

    fn decl(&mut self, node: &DeclNode) {
        match &node.kind {
            Decl::Func(func) => self.func(func),
            Decl::Var(var) => {
                for binding in &var.bindings {
                    let init = match &binding.kind {
                        Binding::Var { init, .. } | Binding::Tuple { init, .. } => init,
                    };
                    if let Some(init) = init {
                        self.expr(init, true);
                    }
                }
            }
            Decl::Import(_) => {}
        }
    }

    fn func(&mut self, func: &FuncDecl) {
        // A block body yields its tail value when present; an expression
        // body is the return value and must produce one.
        let required = !matches!(func.body.kind, Expr::Block { .. });
        self.expr(&func.body, required);
    }

    fn stmt(&mut self, node: &StmtNode) {
        match &node.kind {
            Stmt::Assert { condition, message } => {
                self.expr(condition, true);
                if let Some(message) = message {
                    self.expr(message, true);
                }
            }
            Stmt::Decl(decl) => self.decl(decl),
            Stmt::Expr(expr) => {
                self.expr(expr, false);
            }
            Stmt::While { condition, body } => {
                self.expr(condition, true);
                self.expr(body, false);
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
                    self.expr(condition, true);
                }
                if let Some(step) = step {
                    self.expr(step, false);
                }
                self.expr(body, false);
            }
            Stmt::Empty => {}
        }
    }

    fn expr(&mut self, node: &ExprNode, required: bool) -> ExprType {
        let ty = match &node.kind {
            Expr::Literal(_)
            | Expr::StringLiteral(_)
            | Expr::Var(_)
            | Expr::Tuple(_)
            | Expr::Array(_)
            | Expr::Map(_)
            | Expr::Set(_)
            | Expr::Record(_) => {
                self.value_children(node);
                ExprType::Value
            }
            Expr::Binary { left, right, .. } => {
                self.expr(left, true);
                self.expr(right, true);
                ExprType::Value
            }
            Expr::Unary { operand, .. } => {
                self.expr(operand, true);
                ExprType::Value
            }
            Expr::Call { callee, args } => {
                self.expr(callee, true);
                for arg in args {
                    self.expr(arg, true);
                }
                ExprType::Value
            }
            Expr::Member { object, .. } | Expr::TupleMember { object, .. } => {
                self.expr(object, true);
                ExprType::Value
            }
            Expr::Index { object, index } => {
                self.expr(object, true);
                self.expr(index, true);
                ExprType::Value
            }
            Expr::StringInterpolation(parts) => {
                for part in parts {
                    if let StringPart::Interpolation(expr) = part {
                        self.expr(expr, true);
                    }
                }
                ExprType::Value
            }
            Expr::Func(func) => {
                self.func(func);
                ExprType::Value
            }
            Expr::Return(value) => {
                if let Some(value) = value {
                    self.expr(value, true);
                }
                ExprType::Never
            }
            Expr::Break | Expr::Continue => ExprType::Never,
            Expr::Block { stmts, tail } => {
                for stmt in stmts {
                    self.stmt(stmt);
                }
                let ty = match tail {
                    Some(tail) => self.expr(tail, required),
                    None => ExprType::None,
                };
                if required && !ty.can_use_as_value() && !node.has_error {
                    self.diagnostics.error(
                        node.span,
                        "this block must produce a value: the last statement must be a value-producing expression",
                    );
                    // Recover as a value so parents keep checking.
                    return self.set(node, ExprType::Value);
                }
                ty
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition, true);
                let then_ty = self.expr(then_branch, required);
                let else_ty = else_branch.as_ref().map(|e| self.expr(e, required));
                let ty = match else_ty {
                    Some(else_ty) if then_ty.can_use_as_value() && else_ty.can_use_as_value() => {
                        if then_ty == ExprType::Value || else_ty == ExprType::Value {
                            ExprType::Value
                        } else {
                            ExprType::Never
                        }
                    }
                    _ => ExprType::None,
                };
                if required && !ty.can_use_as_value() && !node.has_error {
                    if else_branch.is_none() {
                        self.diagnostics.error(
                            node.span,
                            "this if expression must produce a value; the else branch must not be missing",
                        );
                    }
                    return self.set(node, ExprType::Value);
                }
                ty
            }
        };

        if required && !ty.can_use_as_value() && !node.has_error {
            self.diagnostics
                .error(node.span, "expected a value-producing expression here");
        }
        self.set(node, ty)
    }

    fn value_children(&mut self, node: &ExprNode) {
        match &node.kind {
            Expr::Literal(_) | Expr::StringLiteral(_) | Expr::Var(_) => {}
            Expr::Tuple(items) | Expr::Array(items) | Expr::Set(items) => {
                for item in items {
                    self.expr(item, true);
                }
            }
            Expr::Map(pairs) => {
                for (key, value) in pairs {
                    self.expr(key, true);
                    self.expr(value, true);
                }
            }
            Expr::Record(fields) => {
                for (_, value) in fields {
                    self.expr(value, true);
                }
            }
            _ => unreachable!("not a plain value expression"),
        }
    }
}
