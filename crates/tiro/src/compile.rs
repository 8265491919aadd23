//! The compilation pipeline.
//!
//! Source text runs through: parse → scope building → symbol resolution →
//! structural checks → type analysis → IR lowering → dead code elimination →
//! bytecode generation. Diagnostics accumulate along the way; when any error
//! was reported the pipeline stops before lowering and returns no module.

use crate::{
    ast::{Binding, Decl, DeclNode, Expr, ExprNode, Stmt, StmtNode, StringPart},
    bytecode::{CompiledModule, generate_module},
    diagnostics::Diagnostics,
    intern::StringTable,
    ir::dce::eliminate_dead_code,
    irgen::lower_module,
    parser::parse_file,
    semantics::{SemanticInfo, checker, scope_builder, types},
};

/// Compiles one module from source. Returns `None` when diagnostics contain
/// errors; warnings alone do not block compilation.
pub fn compile(module_name: &str, source: &str, diagnostics: &mut Diagnostics) -> Option<CompiledModule> {
    let mut strings = StringTable::new();
    let name = strings.insert(module_name);

    let file = parse_file(source, &mut strings, diagnostics);

    let mut info = SemanticInfo::default();
    scope_builder::build_scopes(&file, &strings, &mut info, diagnostics);
    scope_builder::resolve_symbols(&file, &strings, &mut info, diagnostics);
    checker::check_structure(&file, &strings, &info, diagnostics);
    types::analyze_types(&file, &mut info, diagnostics);

    if diagnostics.has_errors() {
        return None;
    }

    let mut module = lower_module(&file, name, source, &mut strings, &info, diagnostics);
    for id in module.function_ids().collect::<Vec<_>>() {
        eliminate_dead_code(module.function_mut(id));
    }

    Some(generate_module(&module, strings))
}

/// Parses the source and renders the typed AST as an indented tree. Parse
/// errors are reported through `diagnostics`; the (partial) tree is dumped
/// regardless.
pub fn dump_ast(source: &str, diagnostics: &mut Diagnostics) -> String {
    let mut strings = StringTable::new();
    let file = parse_file(source, &mut strings, diagnostics);
    let mut printer = AstPrinter {
        strings: &strings,
        out: String::new(),
        depth: 0,
    };
    for item in &file.items {
        printer.decl(item);
    }
    printer.out
}

struct AstPrinter<'a> {
    strings: &'a StringTable,
    out: String,
    depth: usize,
}

impl AstPrinter<'_> {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self)) {
        self.depth += 1;
        f(self);
        self.depth -= 1;
    }

    fn name(&self, id: crate::intern::InternedString) -> &str {
        self.strings.try_get(id).unwrap_or("<invalid>")
    }

    fn decl(&mut self, node: &DeclNode) {
        match &node.kind {
            Decl::Func(func) => {
                let params: Vec<&str> = func.params.iter().map(|p| self.name(p.name)).collect();
                let export = if func.exported { "export " } else { "" };
                self.line(&format!("{export}func {}({})", self.name(func.name), params.join(", ")));
                self.nested(|this| this.expr(&func.body));
            }
            Decl::Var(var) => {
                self.line("var-decl");
                self.nested(|this| {
                    for binding in &var.bindings {
                        match &binding.kind {
                            Binding::Var { name, is_const, init, .. } => {
                                let kind = if *is_const { "const" } else { "var" };
                                this.line(&format!("{kind} {}", this.name(*name)));
                                if let Some(init) = init {
                                    this.nested(|this| this.expr(init));
                                }
                            }
                            Binding::Tuple { names, is_const, init } => {
                                let kind = if *is_const { "const" } else { "var" };
                                let names: Vec<&str> = names.iter().map(|(n, _)| this.name(*n)).collect();
                                this.line(&format!("{kind} ({})", names.join(", ")));
                                if let Some(init) = init {
                                    this.nested(|this| this.expr(init));
                                }
                            }
                        }
                    }
                });
            }
            Decl::Import(import) => self.line(&format!("import {}", self.name(import.module))),
        }
    }

    fn stmt(&mut self, node: &StmtNode) {
        match &node.kind {
            Stmt::Assert { condition, message } => {
                self.line("assert");
                self.nested(|this| {
                    this.expr(condition);
                    if let Some(message) = message {
                        this.expr(message);
                    }
                });
            }
            Stmt::Decl(decl) => self.decl(decl),
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::While { condition, body } => {
                self.line("while");
                self.nested(|this| {
                    this.expr(condition);
                    this.expr(body);
                });
            }
            Stmt::For {
                decl,
                condition,
                step,
                body,
            } => {
                self.line("for");
                self.nested(|this| {
                    if let Some(decl) = decl {
                        this.stmt(decl);
                    }
                    if let Some(condition) = condition {
                        this.expr(condition);
                    }
                    if let Some(step) = step {
                        this.expr(step);
                    }
                    this.expr(body);
                });
            }
            Stmt::Empty => self.line(";"),
        }
    }

    fn expr(&mut self, node: &ExprNode) {
        match &node.kind {
            Expr::Literal(literal) => self.line(&format!("literal {literal:?}")),
            Expr::StringLiteral(text) => self.line(&format!("string {text:?}")),
            Expr::Var(name) => self.line(&format!("var {}", self.name(*name))),
            Expr::Binary { op, left, right } => {
                self.line(&format!("binary {op:?}"));
                self.nested(|this| {
                    this.expr(left);
                    this.expr(right);
                });
            }
            Expr::Unary { op, operand } => {
                self.line(&format!("unary {op:?}"));
                self.nested(|this| this.expr(operand));
            }
            Expr::Call { callee, args } => {
                self.line("call");
                self.nested(|this| {
                    this.expr(callee);
                    for arg in args {
                        this.expr(arg);
                    }
                });
            }
            Expr::Member { object, name } => {
                self.line(&format!("member .{}", self.name(*name)));
                self.nested(|this| this.expr(object));
            }
            Expr::TupleMember { object, index } => {
                self.line(&format!("tuple-member .{index}"));
                self.nested(|this| this.expr(object));
            }
            Expr::Index { object, index } => {
                self.line("index");
                self.nested(|this| {
                    this.expr(object);
                    this.expr(index);
                });
            }
            Expr::Block { stmts, tail } => {
                self.line("block");
                self.nested(|this| {
                    for stmt in stmts {
                        this.stmt(stmt);
                    }
                    if let Some(tail) = tail {
                        this.line("tail");
                        this.nested(|this| this.expr(tail));
                    }
                });
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.line("if");
                self.nested(|this| {
                    this.expr(condition);
                    this.expr(then_branch);
                    if let Some(else_branch) = else_branch {
                        this.expr(else_branch);
                    }
                });
            }
            Expr::Return(value) => {
                self.line("return");
                if let Some(value) = value {
                    self.nested(|this| this.expr(value));
                }
            }
            Expr::Break => self.line("break"),
            Expr::Continue => self.line("continue"),
            Expr::Func(func) => {
                let params: Vec<&str> = func.params.iter().map(|p| self.name(p.name)).collect();
                self.line(&format!("func-literal ({})", params.join(", ")));
                self.nested(|this| this.expr(&func.body));
            }
            Expr::StringInterpolation(parts) => {
                self.line("string-interpolation");
                self.nested(|this| {
                    for part in parts {
                        match part {
                            StringPart::Text(text) => this.line(&format!("text {text:?}")),
                            StringPart::Interpolation(expr) => this.expr(expr),
                        }
                    }
                });
            }
            Expr::Tuple(items) => self.list("tuple", items),
            Expr::Array(items) => self.list("array", items),
            Expr::Set(items) => self.list("set", items),
            Expr::Map(pairs) => {
                self.line("map");
                self.nested(|this| {
                    for (key, value) in pairs {
                        this.expr(key);
                        this.expr(value);
                    }
                });
            }
            Expr::Record(fields) => {
                self.line("record");
                self.nested(|this| {
                    for (name, value) in fields {
                        this.line(&format!("field {}", this.name(*name)));
                        this.nested(|this| this.expr(value));
                    }
                });
            }
        }
    }

    fn list(&mut self, label: &str, items: &[ExprNode]) {
        self.line(label);
        self.nested(|this| {
            for item in items {
                this.expr(item);
            }
        });
    }
}
