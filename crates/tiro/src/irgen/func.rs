//! Lowering of a single function body to SSA.
//!
//! SSA form is built on the fly: every mutable variable keeps a per-block
//! "current definition"; reads consult it and create phis at join points.
//! Blocks are sealed as soon as all their predecessors are known; reads in
//! unsealed blocks create operandless placeholder phis that are completed at
//! seal time. Trivial phis (all operands identical) collapse into plain
//! copies.
//!
//! Closure environments are threaded through the same machinery: each
//! environment created by this function is a pseudo-variable, so reads of an
//! environment inside a loop join correctly across iterations.
//!
//! Repeated pure computations (constants, unary and binary operators) are
//! elided per block through a computed-value cache.

use ahash::AHashMap;

use crate::{
    ast::{
        AstId, Binding, BindingNode, BinaryOp, Decl, Expr, ExprNode, FuncDecl, Literal, Stmt as AstStmt, StmtNode,
        StringPart, UnaryOp,
    },
    intern::InternedString,
    ir::{
        Aggregate, BinaryOpKind, BlockId, BranchKind, Constant, ContainerKind, FloatConstant, Function, FunctionKind,
        LValue, Local, LocalId, Phi, RValue, Stmt, Terminator, UnaryOpKind,
    },
    irgen::{
        ModuleCtx,
        env::{EnvId, EnvLocation},
    },
    semantics::{ScopeId, SymbolId, SymbolKind},
};

/// Key of a per-block current definition: a source variable or one of this
/// function's closure environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VarKey {
    Symbol(SymbolId),
    Env(EnvId),
}

/// A reusable pure computation, used as the key of the per-block
/// common-subexpression cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ComputedValue {
    Constant(Constant),
    UnaryOp {
        op: UnaryOpKind,
        operand: LocalId,
    },
    BinaryOp {
        op: BinaryOpKind,
        left: LocalId,
        right: LocalId,
    },
}

/// Result of lowering one expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprResult {
    /// The expression produced this local.
    Value(LocalId),
    /// Nothing was generated; only valid where no value is needed.
    None,
    /// Control flow diverted; the current block is terminated.
    Unreachable,
}

struct LoopContext {
    break_target: BlockId,
    continue_target: BlockId,
}

pub struct FunctionIrGen<'a, 'ast> {
    ctx: &'a mut ModuleCtx<'ast>,
    func: Function,
    outer_env: Option<EnvId>,
    /// Environments created by this function, innermost last.
    env_stack: Vec<EnvId>,
    current: BlockId,
    reachable: bool,
    variables: AHashMap<(VarKey, BlockId), LocalId>,
    incomplete_phis: AHashMap<BlockId, Vec<(VarKey, LocalId)>>,
    cse: AHashMap<(BlockId, ComputedValue), LocalId>,
    loops: Vec<LoopContext>,
}

impl<'a, 'ast> FunctionIrGen<'a, 'ast> {
    pub fn new(
        ctx: &'a mut ModuleCtx<'ast>,
        name: InternedString,
        kind: FunctionKind,
        params: u32,
        outer_env: Option<EnvId>,
    ) -> Self {
        let func = Function::new(name, kind, params, ctx.strings);
        let entry = func.entry();
        Self {
            ctx,
            func,
            outer_env,
            env_stack: Vec::new(),
            current: entry,
            reachable: true,
            variables: AHashMap::new(),
            incomplete_phis: AHashMap::new(),
            cse: AHashMap::new(),
            loops: Vec::new(),
        }
    }

    /// Lowers a function declaration body.
    pub fn lower(mut self, decl: &'ast FuncDecl, node: AstId) -> Function {
        self.seal(self.func.entry());

        // Closures read their creation environment first.
        if self.func.kind == FunctionKind::Closure {
            let outer = self.define(RValue::OuterEnvironment);
            if let Some(env) = self.outer_env {
                self.write_variable(VarKey::Env(env), self.current, outer);
            }
        }

        let params_scope = self.ctx.info.node_scopes[&node];
        let pushed = self.enter_scope(params_scope);

        let result = self.gen_expr(&decl.body);
        if self.reachable {
            let value = match result {
                ExprResult::Value(local) => local,
                ExprResult::None => self.define(RValue::Constant(Constant::Null)),
                ExprResult::Unreachable => unreachable!("reachable lowering cannot yield unreachable"),
            };
            let exit = self.func.exit();
            self.end_block(Terminator::Return { value, target: exit });
        }

        self.exit_scope(pushed);
        self.finish()
    }

    /// Lowers the synthesized module initializer from the module-level
    /// variable bindings.
    pub fn lower_module_init(mut self, bindings: &[&'ast BindingNode]) -> Function {
        self.seal(self.func.entry());
        for binding in bindings {
            if !self.reachable {
                break;
            }
            self.gen_binding(binding);
        }
        if self.reachable {
            let value = self.define(RValue::Constant(Constant::Null));
            let exit = self.func.exit();
            self.end_block(Terminator::Return { value, target: exit });
        }
        self.finish()
    }

    fn finish(mut self) -> Function {
        debug_assert!(self.incomplete_phis.is_empty(), "all blocks must be sealed");
        let exit = self.func.exit();
        self.func.block_mut(exit).sealed = true;
        self.func.block_mut(exit).set_terminator(Terminator::Exit);
        self.func
    }

    // --- blocks ---

    fn new_block(&mut self, label: &str) -> BlockId {
        let label = self.ctx.strings.insert(label);
        self.func.make_block(label)
    }

    fn begin_block(&mut self, block: BlockId) {
        self.current = block;
        self.reachable = block == self.func.entry() || self.func.block(block).predecessor_count() > 0;
    }

    fn end_block(&mut self, terminator: Terminator) {
        debug_assert!(self.reachable, "cannot terminate an unreachable block");
        let current = self.current;
        debug_assert!(
            !self.func.block(current).is_terminated(),
            "block already has a terminator"
        );
        self.func.block_mut(current).set_terminator(terminator);
        let mut targets = smallvec::SmallVec::<[BlockId; 2]>::new();
        terminator.visit_targets(|t| targets.push(t));
        for target in targets {
            self.func.block_mut(target).add_predecessor(current);
        }
        self.func.block_mut(current).filled = true;
        self.reachable = false;
    }

    /// Marks a block as having all its predecessors and completes its
    /// pending phis.
    fn seal(&mut self, block: BlockId) {
        debug_assert!(!self.func.block(block).sealed, "block is already sealed");
        self.func.block_mut(block).sealed = true;
        if let Some(pending) = self.incomplete_phis.remove(&block) {
            for (key, local) in pending {
                self.add_phi_operands(key, local, block);
            }
        }
    }

    // --- SSA variable tracking ---

    fn write_variable(&mut self, key: VarKey, block: BlockId, value: LocalId) {
        self.variables.insert((key, block), value);
    }

    fn read_variable(&mut self, key: VarKey, block: BlockId) -> LocalId {
        if let Some(&value) = self.variables.get(&(key, block)) {
            return value;
        }
        self.read_variable_recursive(key, block)
    }

    fn read_variable_recursive(&mut self, key: VarKey, block: BlockId) -> LocalId {
        let value;
        if !self.func.block(block).sealed {
            // Predecessors are not all known yet; the placeholder phi is
            // completed when the block is sealed.
            let local = self.make_phi_placeholder(block);
            self.incomplete_phis.entry(block).or_default().push((key, local));
            value = local;
        } else if self.func.block(block).predecessor_count() == 1 {
            let pred = self.func.block(block).predecessors()[0];
            value = self.read_variable(key, pred);
        } else {
            // Write the operandless phi first to break lookup cycles, then
            // fill its operands.
            let local = self.make_phi_placeholder(block);
            self.write_variable(key, block, local);
            value = self.add_phi_operands(key, local, block);
        }
        self.write_variable(key, block, value);
        value
    }

    fn make_phi_placeholder(&mut self, block: BlockId) -> LocalId {
        let local = self.func.make_local(Local::new(RValue::Phi0));
        self.func.block_mut(block).prepend_stmt(Stmt::Define { local });
        local
    }

    fn add_phi_operands(&mut self, key: VarKey, phi_local: LocalId, block: BlockId) -> LocalId {
        let preds: Vec<BlockId> = self.func.block(block).predecessors().to_vec();
        let operands: smallvec::SmallVec<[LocalId; 4]> =
            preds.iter().map(|&pred| self.read_variable(key, pred)).collect();
        let phi = self.func.make_phi(Phi { operands });
        self.func.local_mut(phi_local).value = RValue::Phi { phi };
        self.try_remove_trivial_phi(phi_local)
    }

    /// A phi whose operands are all the same value (or itself) is a plain
    /// copy of that value.
    fn try_remove_trivial_phi(&mut self, phi_local: LocalId) -> LocalId {
        let RValue::Phi { phi } = self.func.local(phi_local).value else {
            return phi_local;
        };
        let mut same = None;
        for &operand in &self.func.phi(phi).operands {
            if operand == phi_local || Some(operand) == same {
                continue;
            }
            if same.is_some() {
                return phi_local; // merges at least two distinct values
            }
            same = Some(operand);
        }
        let Some(same) = same else {
            return phi_local; // unreachable or self-referential only
        };
        self.func.local_mut(phi_local).value = RValue::UseLocal { target: same };
        phi_local
    }

    // --- values and statements ---

    /// Appends a define for `value`, reusing an earlier local for repeated
    /// pure computations within the current block.
    fn define(&mut self, value: RValue) -> LocalId {
        let key = match &value {
            RValue::Constant(constant) => Some(ComputedValue::Constant(*constant)),
            RValue::UnaryOp { op, operand } => Some(ComputedValue::UnaryOp {
                op: *op,
                operand: *operand,
            }),
            RValue::BinaryOp { op, left, right } => Some(ComputedValue::BinaryOp {
                op: *op,
                left: *left,
                right: *right,
            }),
            _ => None,
        };
        if let Some(key) = key
            && let Some(&existing) = self.cse.get(&(self.current, key))
        {
            return existing;
        }
        let local = self.func.make_local(Local::new(value));
        self.func.block_mut(self.current).append_stmt(Stmt::Define { local });
        if let Some(key) = key {
            self.cse.insert((self.current, key), local);
        }
        local
    }

    fn emit(&mut self, stmt: Stmt) {
        self.func.block_mut(self.current).append_stmt(stmt);
    }

    // --- environments ---

    fn innermost_env(&self) -> Option<EnvId> {
        self.env_stack.last().copied().or(self.outer_env)
    }

    /// The local holding the runtime value of `env` at the current point.
    fn env_local(&mut self, env: EnvId) -> LocalId {
        self.read_variable(VarKey::Env(env), self.current)
    }

    /// Enters a scope; creates a closure environment when the scope declares
    /// captured symbols. Returns whether an environment was pushed.
    fn enter_scope(&mut self, scope: ScopeId) -> bool {
        let Some(captured) = self.ctx.captured_by_scope.get(&scope) else {
            return false;
        };
        if captured.is_empty() {
            return false;
        }
        let captured = captured.clone();
        let parent = self.innermost_env();
        let size = u32::try_from(captured.len()).expect("environment size overflow");
        let env = self.ctx.envs.make_env(parent, size);
        for (slot, &symbol) in captured.iter().enumerate() {
            self.ctx.envs.set_location(
                symbol,
                EnvLocation {
                    env,
                    index: slot as u32,
                },
            );
        }

        let parent_local = match parent {
            Some(parent) => self.env_local(parent),
            None => self.define(RValue::Constant(Constant::Null)),
        };
        let env_local = self.define(RValue::MakeEnvironment {
            parent: parent_local,
            size,
        });
        self.write_variable(VarKey::Env(env), self.current, env_local);
        self.env_stack.push(env);

        // Captured parameters start out with their argument value.
        for (slot, &symbol) in captured.iter().enumerate() {
            if self.ctx.info.symbols.symbol(symbol).kind == SymbolKind::Parameter {
                let index = self.param_index(symbol);
                let value = self.define(RValue::UseLValue {
                    target: LValue::Param { index },
                });
                self.emit(Stmt::Assign {
                    target: LValue::Closure {
                        env: env_local,
                        levels: 0,
                        index: slot as u32,
                    },
                    value,
                });
            }
        }
        true
    }

    fn exit_scope(&mut self, pushed: bool) {
        if pushed {
            self.env_stack.pop();
        }
    }

    fn param_index(&self, symbol: SymbolId) -> u32 {
        let scope = self.ctx.info.symbols.symbol(symbol).scope;
        let position = self
            .ctx
            .info
            .symbols
            .scope(scope)
            .symbols()
            .iter()
            .position(|&s| s == symbol)
            .expect("parameter symbol must be in its scope");
        position as u32
    }

    fn closure_lvalue(&mut self, symbol: SymbolId) -> LValue {
        let location = self
            .ctx
            .envs
            .location(symbol)
            .expect("captured symbol must have an environment slot");
        let start = self
            .innermost_env()
            .expect("captured access requires an active environment");
        let levels = self.ctx.envs.distance(start, location.env);
        let env = self.env_local(start);
        LValue::Closure {
            env,
            levels,
            index: location.index,
        }
    }

    // --- symbols ---

    fn read_symbol(&mut self, symbol: SymbolId) -> LocalId {
        let data = self.ctx.info.symbols.symbol(symbol);
        match data.kind {
            SymbolKind::Parameter => {
                if data.captured {
                    let target = self.closure_lvalue(symbol);
                    self.define(RValue::UseLValue { target })
                } else {
                    let index = self.param_index(symbol);
                    self.define(RValue::UseLValue {
                        target: LValue::Param { index },
                    })
                }
            }
            SymbolKind::Function | SymbolKind::Import | SymbolKind::ModuleVar => {
                let member = self.ctx.symbol_members[&symbol];
                self.define(RValue::UseLValue {
                    target: LValue::Module { member },
                })
            }
            SymbolKind::LocalVar => {
                if data.captured {
                    let target = self.closure_lvalue(symbol);
                    self.define(RValue::UseLValue { target })
                } else {
                    self.read_variable(VarKey::Symbol(symbol), self.current)
                }
            }
        }
    }

    fn write_symbol(&mut self, symbol: SymbolId, value: LocalId) {
        let data = self.ctx.info.symbols.symbol(symbol);
        match data.kind {
            SymbolKind::Parameter => {
                if data.captured {
                    let target = self.closure_lvalue(symbol);
                    self.emit(Stmt::Assign { target, value });
                } else {
                    let index = self.param_index(symbol);
                    self.emit(Stmt::Assign {
                        target: LValue::Param { index },
                        value,
                    });
                }
            }
            SymbolKind::ModuleVar => {
                let member = self.ctx.symbol_members[&symbol];
                self.emit(Stmt::Assign {
                    target: LValue::Module { member },
                    value,
                });
            }
            SymbolKind::LocalVar => {
                if data.captured {
                    let target = self.closure_lvalue(symbol);
                    self.emit(Stmt::Assign { target, value });
                } else {
                    self.write_variable(VarKey::Symbol(symbol), self.current, value);
                    self.func.local_mut(value).name = data.name;
                }
            }
            SymbolKind::Function | SymbolKind::Import => {
                unreachable!("checker rejects writes to functions and imports")
            }
        }
    }

    // --- statements ---

    fn gen_stmt(&mut self, node: &'ast StmtNode) {
        match &node.kind {
            AstStmt::Assert { condition, message } => self.gen_assert(condition, message.as_deref()),
            AstStmt::Decl(decl) => self.gen_decl(decl),
            AstStmt::Expr(expr) => {
                let _ = self.gen_expr(expr);
            }
            AstStmt::While { condition, body } => self.gen_while(condition, body),
            AstStmt::For {
                decl,
                condition,
                step,
                body,
            } => self.gen_for(node.id, decl.as_deref(), condition.as_deref(), step.as_deref(), body),
            AstStmt::Empty => {}
        }
    }

    fn gen_decl(&mut self, node: &'ast crate::ast::DeclNode) {
        match &node.kind {
            Decl::Func(func) => {
                // A named local function is a constant binding to a closure.
                let value = self.gen_closure(node.id, func);
                if let Some(&symbol) = self.ctx.info.symbols_of_decl(node.id).first() {
                    self.write_symbol(symbol, value);
                }
            }
            Decl::Var(var) => {
                for binding in &var.bindings {
                    if !self.reachable {
                        return;
                    }
                    self.gen_binding(binding);
                }
            }
            Decl::Import(_) => {}
        }
    }

    fn gen_binding(&mut self, binding: &'ast BindingNode) {
        let symbols: Vec<SymbolId> = self.ctx.info.symbols_of_decl(binding.id).to_vec();
        match &binding.kind {
            Binding::Var { init, .. } => {
                let value = match init {
                    Some(init) => match self.gen_value(init) {
                        Some(value) => value,
                        None => return,
                    },
                    None => self.define(RValue::Constant(Constant::Null)),
                };
                if let Some(&symbol) = symbols.first() {
                    self.write_symbol(symbol, value);
                }
            }
            Binding::Tuple { init, .. } => {
                let Some(init) = init else {
                    // Checker reported missing initializers; define nulls so
                    // later reads stay well formed.
                    for &symbol in &symbols {
                        let value = self.define(RValue::Constant(Constant::Null));
                        self.write_symbol(symbol, value);
                    }
                    return;
                };
                let Some(tuple) = self.gen_value(init) else { return };
                for (index, &symbol) in symbols.iter().enumerate() {
                    let value = self.define(RValue::UseLValue {
                        target: LValue::TupleField {
                            object: tuple,
                            index: index as u32,
                        },
                    });
                    self.write_symbol(symbol, value);
                }
            }
        }
    }

    fn gen_assert(&mut self, condition: &'ast ExprNode, message: Option<&'ast ExprNode>) {
        let Some(cond) = self.gen_value(condition) else { return };
        let ok_block = self.new_block("assert.ok");
        let fail_block = self.new_block("assert.fail");
        self.end_block(Terminator::Branch {
            kind: BranchKind::IfTrue,
            condition: cond,
            target: ok_block,
            fallthrough: fail_block,
        });
        self.seal(ok_block);
        self.seal(fail_block);

        self.begin_block(fail_block);
        let text = condition.span.text(self.ctx.source);
        let text = self.ctx.strings.insert(text);
        let expr = self.define(RValue::Constant(Constant::String(text)));
        let message = match message {
            Some(message) => match self.gen_value(message) {
                Some(message) => message,
                None => {
                    self.begin_block(ok_block);
                    return;
                }
            },
            None => self.define(RValue::Constant(Constant::Null)),
        };
        let exit = self.func.exit();
        self.end_block(Terminator::AssertFail {
            expr,
            message,
            target: exit,
        });

        self.begin_block(ok_block);
    }

    fn gen_while(&mut self, condition: &'ast ExprNode, body: &'ast ExprNode) {
        let cond_block = self.new_block("while.cond");
        let body_block = self.new_block("while.body");
        let end_block = self.new_block("while.end");

        self.end_block(Terminator::Jump { target: cond_block });
        self.begin_block(cond_block); // unsealed: the back edge is pending

        let Some(cond) = self.gen_value(condition) else {
            self.seal(cond_block);
            self.seal(body_block);
            self.seal(end_block);
            self.begin_block(end_block);
            return;
        };
        self.end_block(Terminator::Branch {
            kind: BranchKind::IfTrue,
            condition: cond,
            target: body_block,
            fallthrough: end_block,
        });

        self.seal(body_block);
        self.begin_block(body_block);
        self.loops.push(LoopContext {
            break_target: end_block,
            continue_target: cond_block,
        });
        let _ = self.gen_expr(body);
        self.loops.pop();
        if self.reachable {
            self.end_block(Terminator::Jump { target: cond_block });
        }

        self.seal(cond_block);
        self.seal(end_block);
        self.begin_block(end_block);
    }

    fn gen_for(
        &mut self,
        node: AstId,
        decl: Option<&'ast StmtNode>,
        condition: Option<&'ast ExprNode>,
        step: Option<&'ast ExprNode>,
        body: &'ast ExprNode,
    ) {
        let scope = self.ctx.info.node_scopes[&node];
        let pushed = self.enter_scope(scope);

        if let Some(decl) = decl {
            self.gen_stmt(decl);
        }
        if !self.reachable {
            self.exit_scope(pushed);
            return;
        }

        let cond_block = self.new_block("for.cond");
        let body_block = self.new_block("for.body");
        let step_block = self.new_block("for.step");
        let end_block = self.new_block("for.end");

        self.end_block(Terminator::Jump { target: cond_block });
        self.begin_block(cond_block); // unsealed: the step edge is pending

        let cond = match condition {
            Some(condition) => match self.gen_value(condition) {
                Some(cond) => cond,
                None => {
                    self.seal(cond_block);
                    self.seal(body_block);
                    self.seal(step_block);
                    self.seal(end_block);
                    self.begin_block(end_block);
                    self.exit_scope(pushed);
                    return;
                }
            },
            None => self.define(RValue::Constant(Constant::Bool(true))),
        };
        self.end_block(Terminator::Branch {
            kind: BranchKind::IfTrue,
            condition: cond,
            target: body_block,
            fallthrough: end_block,
        });

        self.seal(body_block);
        self.begin_block(body_block);
        self.loops.push(LoopContext {
            break_target: end_block,
            continue_target: step_block,
        });
        let _ = self.gen_expr(body);
        self.loops.pop();
        if self.reachable {
            self.end_block(Terminator::Jump { target: step_block });
        }

        self.seal(step_block);
        self.begin_block(step_block);
        if self.reachable {
            if let Some(step) = step {
                let _ = self.gen_expr(step);
            }
            if self.reachable {
                self.end_block(Terminator::Jump { target: cond_block });
            }
        }

        self.seal(cond_block);
        self.seal(end_block);
        self.begin_block(end_block);
        self.exit_scope(pushed);
    }

    // --- expressions ---

    fn gen_value(&mut self, node: &'ast ExprNode) -> Option<LocalId> {
        match self.gen_expr(node) {
            ExprResult::Value(local) => Some(local),
            ExprResult::Unreachable => None,
            ExprResult::None => {
                debug_assert!(false, "type analysis rejects valueless expressions in value positions");
                Some(self.define(RValue::Constant(Constant::Null)))
            }
        }
    }

    fn gen_expr(&mut self, node: &'ast ExprNode) -> ExprResult {
        debug_assert!(self.reachable, "lowering must stop at unreachable code");
        match &node.kind {
            Expr::Literal(literal) => {
                let constant = match literal {
                    Literal::Null => Constant::Null,
                    Literal::Bool(value) => Constant::Bool(*value),
                    Literal::Int(value) => Constant::Int(*value),
                    Literal::Float(value) => Constant::Float(FloatConstant(*value)),
                    Literal::Symbol(name) => Constant::Symbol(*name),
                };
                ExprResult::Value(self.define(RValue::Constant(constant)))
            }
            Expr::StringLiteral(text) => {
                let text = self.ctx.strings.insert(text);
                ExprResult::Value(self.define(RValue::Constant(Constant::String(text))))
            }
            Expr::Var(_) => {
                let symbol = self
                    .ctx
                    .info
                    .symbol_of_var(node.id)
                    .expect("resolution must bind every variable");
                ExprResult::Value(self.read_symbol(symbol))
            }
            Expr::Binary { op, left, right } => self.gen_binary(*op, left, right),
            Expr::Unary { op, operand } => {
                let Some(operand) = self.gen_value(operand) else {
                    return ExprResult::Unreachable;
                };
                let op = match op {
                    UnaryOp::Plus => UnaryOpKind::Plus,
                    UnaryOp::Minus => UnaryOpKind::Minus,
                    UnaryOp::Not => UnaryOpKind::Not,
                    UnaryOp::BitNot => UnaryOpKind::BitNot,
                };
                ExprResult::Value(self.define(RValue::UnaryOp { op, operand }))
            }
            Expr::Call { callee, args } => self.gen_call(callee, args),
            Expr::Member { object, name } => {
                let Some(object) = self.gen_value(object) else {
                    return ExprResult::Unreachable;
                };
                ExprResult::Value(self.define(RValue::UseLValue {
                    target: LValue::Field { object, name: *name },
                }))
            }
            Expr::TupleMember { object, index } => {
                let Some(object) = self.gen_value(object) else {
                    return ExprResult::Unreachable;
                };
                ExprResult::Value(self.define(RValue::UseLValue {
                    target: LValue::TupleField {
                        object,
                        index: *index,
                    },
                }))
            }
            Expr::Index { object, index } => {
                let Some(object) = self.gen_value(object) else {
                    return ExprResult::Unreachable;
                };
                let Some(index) = self.gen_value(index) else {
                    return ExprResult::Unreachable;
                };
                ExprResult::Value(self.define(RValue::UseLValue {
                    target: LValue::Index { object, index },
                }))
            }
            Expr::Block { .. } => self.gen_block(node),
            Expr::If { .. } => self.gen_if(node),
            Expr::Return(value) => {
                let value = match value {
                    Some(value) => match self.gen_value(value) {
                        Some(value) => value,
                        None => return ExprResult::Unreachable,
                    },
                    None => self.define(RValue::Constant(Constant::Null)),
                };
                let exit = self.func.exit();
                self.end_block(Terminator::Return { value, target: exit });
                ExprResult::Unreachable
            }
            Expr::Break => {
                let target = self.loops.last().expect("checker verifies loop context").break_target;
                self.end_block(Terminator::Jump { target });
                ExprResult::Unreachable
            }
            Expr::Continue => {
                let target = self
                    .loops
                    .last()
                    .expect("checker verifies loop context")
                    .continue_target;
                self.end_block(Terminator::Jump { target });
                ExprResult::Unreachable
            }
            Expr::Func(func) => ExprResult::Value(self.gen_closure(node.id, func)),
            Expr::StringInterpolation(parts) => {
                let mut locals = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        StringPart::Text(text) => {
                            let text = self.ctx.strings.insert(text);
                            locals.push(self.define(RValue::Constant(Constant::String(text))));
                        }
                        StringPart::Interpolation(expr) => {
                            let Some(value) = self.gen_value(expr) else {
                                return ExprResult::Unreachable;
                            };
                            locals.push(value);
                        }
                    }
                }
                let args = self.func.make_list(locals);
                ExprResult::Value(self.define(RValue::Format { args }))
            }
            Expr::Tuple(items) => self.gen_container(ContainerKind::Tuple, items),
            Expr::Array(items) => self.gen_container(ContainerKind::Array, items),
            Expr::Set(items) => self.gen_container(ContainerKind::Set, items),
            Expr::Map(pairs) => {
                let mut locals = Vec::with_capacity(pairs.len() * 2);
                for (key, value) in pairs {
                    let Some(key) = self.gen_value(key) else {
                        return ExprResult::Unreachable;
                    };
                    let Some(value) = self.gen_value(value) else {
                        return ExprResult::Unreachable;
                    };
                    locals.push(key);
                    locals.push(value);
                }
                let args = self.func.make_list(locals);
                ExprResult::Value(self.define(RValue::Container {
                    container: ContainerKind::Map,
                    args,
                }))
            }
            Expr::Record(fields) => {
                let keys: Vec<InternedString> = fields.iter().map(|(name, _)| *name).collect();
                let mut locals = Vec::with_capacity(fields.len());
                for (_, value) in fields {
                    let Some(value) = self.gen_value(value) else {
                        return ExprResult::Unreachable;
                    };
                    locals.push(value);
                }
                let schema = self.func.make_record_schema(keys);
                let values = self.func.make_list(locals);
                ExprResult::Value(self.define(RValue::Record { schema, values }))
            }
        }
    }

    fn gen_container(&mut self, container: ContainerKind, items: &'ast [ExprNode]) -> ExprResult {
        let mut locals = Vec::with_capacity(items.len());
        for item in items {
            let Some(value) = self.gen_value(item) else {
                return ExprResult::Unreachable;
            };
            locals.push(value);
        }
        let args = self.func.make_list(locals);
        ExprResult::Value(self.define(RValue::Container { container, args }))
    }

    fn gen_closure(&mut self, node: AstId, decl: &'ast FuncDecl) -> LocalId {
        let outer = self.innermost_env();
        let func = self.ctx.queue_function(decl, node, FunctionKind::Closure, outer);
        let env = match outer {
            Some(env) => self.env_local(env),
            None => self.define(RValue::Constant(Constant::Null)),
        };
        self.define(RValue::MakeClosure { env, func })
    }

    fn gen_call(&mut self, callee: &'ast ExprNode, args: &'ast [ExprNode]) -> ExprResult {
        // `object.name(...)` resolves a method and calls it with the
        // instance; everything else is a plain call.
        if let Expr::Member { object, name } = &callee.kind {
            let Some(instance) = self.gen_value(object) else {
                return ExprResult::Unreachable;
            };
            let method = self.define(RValue::Aggregate(Aggregate::Method {
                instance,
                function: *name,
            }));
            let mut locals = Vec::with_capacity(args.len());
            for arg in args {
                let Some(value) = self.gen_value(arg) else {
                    return ExprResult::Unreachable;
                };
                locals.push(value);
            }
            let args = self.func.make_list(locals);
            ExprResult::Value(self.define(RValue::MethodCall { method, args }))
        } else {
            let Some(func) = self.gen_value(callee) else {
                return ExprResult::Unreachable;
            };
            let mut locals = Vec::with_capacity(args.len());
            for arg in args {
                let Some(value) = self.gen_value(arg) else {
                    return ExprResult::Unreachable;
                };
                locals.push(value);
            }
            let args = self.func.make_list(locals);
            ExprResult::Value(self.define(RValue::Call { func, args }))
        }
    }

    fn gen_binary(&mut self, op: BinaryOp, left: &'ast ExprNode, right: &'ast ExprNode) -> ExprResult {
        match op {
            BinaryOp::Assign => self.gen_assign(left, right),
            BinaryOp::LogicalAnd => self.gen_logical(BranchKind::IfTrue, "and", left, right),
            BinaryOp::LogicalOr => self.gen_logical(BranchKind::IfFalse, "or", left, right),
            _ => {
                let Some(lhs) = self.gen_value(left) else {
                    return ExprResult::Unreachable;
                };
                let Some(rhs) = self.gen_value(right) else {
                    return ExprResult::Unreachable;
                };
                let op = match op {
                    BinaryOp::Add => BinaryOpKind::Add,
                    BinaryOp::Sub => BinaryOpKind::Sub,
                    BinaryOp::Mul => BinaryOpKind::Mul,
                    BinaryOp::Div => BinaryOpKind::Div,
                    BinaryOp::Mod => BinaryOpKind::Mod,
                    BinaryOp::Pow => BinaryOpKind::Pow,
                    BinaryOp::Less => BinaryOpKind::Less,
                    BinaryOp::LessEq => BinaryOpKind::LessEq,
                    BinaryOp::Greater => BinaryOpKind::Greater,
                    BinaryOp::GreaterEq => BinaryOpKind::GreaterEq,
                    BinaryOp::Eq => BinaryOpKind::Eq,
                    BinaryOp::NotEq => BinaryOpKind::NotEq,
                    BinaryOp::BitAnd => BinaryOpKind::BitAnd,
                    BinaryOp::BitOr => BinaryOpKind::BitOr,
                    BinaryOp::BitXor => BinaryOpKind::BitXor,
                    BinaryOp::ShiftLeft => BinaryOpKind::ShiftLeft,
                    BinaryOp::ShiftRight => BinaryOpKind::ShiftRight,
                    BinaryOp::Assign | BinaryOp::LogicalAnd | BinaryOp::LogicalOr => unreachable!(),
                };
                ExprResult::Value(self.define(RValue::BinaryOp { op, left: lhs, right: rhs }))
            }
        }
    }

    /// Short-circuiting `&&` / `||`. `kind` selects when the right side is
    /// evaluated: `IfTrue` for `&&`, `IfFalse` for `||`.
    fn gen_logical(
        &mut self,
        kind: BranchKind,
        label: &str,
        left: &'ast ExprNode,
        right: &'ast ExprNode,
    ) -> ExprResult {
        let Some(lhs) = self.gen_value(left) else {
            return ExprResult::Unreachable;
        };
        let rhs_block = self.new_block(&format!("{label}.rhs"));
        let join_block = self.new_block(&format!("{label}.end"));

        // The branch's fallthrough edge carries the left value to the join.
        self.end_block(Terminator::Branch {
            kind,
            condition: lhs,
            target: rhs_block,
            fallthrough: join_block,
        });
        self.seal(rhs_block);
        self.begin_block(rhs_block);

        let mut incoming = vec![lhs];
        if let Some(rhs) = self.gen_value(right) {
            self.end_block(Terminator::Jump { target: join_block });
            incoming.push(rhs);
        }
        self.seal(join_block);
        self.begin_block(join_block);

        if incoming.len() == 1 {
            ExprResult::Value(incoming[0])
        } else {
            let phi = self.func.make_phi(Phi {
                operands: incoming.into_iter().collect(),
            });
            ExprResult::Value(self.define(RValue::Phi { phi }))
        }
    }

    fn gen_assign(&mut self, left: &'ast ExprNode, right: &'ast ExprNode) -> ExprResult {
        match &left.kind {
            Expr::Var(_) => {
                let symbol = self
                    .ctx
                    .info
                    .symbol_of_var(left.id)
                    .expect("resolution must bind every variable");
                let Some(value) = self.gen_value(right) else {
                    return ExprResult::Unreachable;
                };
                self.write_symbol(symbol, value);
                ExprResult::Value(value)
            }
            Expr::Member { object, name } => {
                let Some(object) = self.gen_value(object) else {
                    return ExprResult::Unreachable;
                };
                let Some(value) = self.gen_value(right) else {
                    return ExprResult::Unreachable;
                };
                self.emit(Stmt::Assign {
                    target: LValue::Field { object, name: *name },
                    value,
                });
                ExprResult::Value(value)
            }
            Expr::TupleMember { object, index } => {
                let Some(object) = self.gen_value(object) else {
                    return ExprResult::Unreachable;
                };
                let Some(value) = self.gen_value(right) else {
                    return ExprResult::Unreachable;
                };
                self.emit(Stmt::Assign {
                    target: LValue::TupleField {
                        object,
                        index: *index,
                    },
                    value,
                });
                ExprResult::Value(value)
            }
            Expr::Index { object, index } => {
                let Some(object) = self.gen_value(object) else {
                    return ExprResult::Unreachable;
                };
                let Some(index) = self.gen_value(index) else {
                    return ExprResult::Unreachable;
                };
                let Some(value) = self.gen_value(right) else {
                    return ExprResult::Unreachable;
                };
                self.emit(Stmt::Assign {
                    target: LValue::Index { object, index },
                    value,
                });
                ExprResult::Value(value)
            }
            Expr::Tuple(targets) => {
                // Destructuring: evaluate the right side once, then assign
                // each tuple field to its place in order.
                let Some(tuple) = self.gen_value(right) else {
                    return ExprResult::Unreachable;
                };
                for (index, target) in targets.iter().enumerate() {
                    let value = self.define(RValue::UseLValue {
                        target: LValue::TupleField {
                            object: tuple,
                            index: index as u32,
                        },
                    });
                    if let Expr::Var(_) = &target.kind {
                        let symbol = self
                            .ctx
                            .info
                            .symbol_of_var(target.id)
                            .expect("resolution must bind every variable");
                        self.write_symbol(symbol, value);
                    } else {
                        let ExprResult::Value(_) = self.gen_assign_to_place(target, value) else {
                            return ExprResult::Unreachable;
                        };
                    }
                }
                ExprResult::Value(tuple)
            }
            _ => {
                debug_assert!(false, "checker rejects invalid assignment targets");
                self.gen_expr(right)
            }
        }
    }

    /// Assigns an already computed value to a place expression.
    fn gen_assign_to_place(&mut self, place: &'ast ExprNode, value: LocalId) -> ExprResult {
        match &place.kind {
            Expr::Member { object, name } => {
                let Some(object) = self.gen_value(object) else {
                    return ExprResult::Unreachable;
                };
                self.emit(Stmt::Assign {
                    target: LValue::Field { object, name: *name },
                    value,
                });
            }
            Expr::TupleMember { object, index } => {
                let Some(object) = self.gen_value(object) else {
                    return ExprResult::Unreachable;
                };
                self.emit(Stmt::Assign {
                    target: LValue::TupleField {
                        object,
                        index: *index,
                    },
                    value,
                });
            }
            Expr::Index { object, index } => {
                let Some(object) = self.gen_value(object) else {
                    return ExprResult::Unreachable;
                };
                let Some(index) = self.gen_value(index) else {
                    return ExprResult::Unreachable;
                };
                self.emit(Stmt::Assign {
                    target: LValue::Index { object, index },
                    value,
                });
            }
            _ => debug_assert!(false, "checker rejects invalid assignment targets"),
        }
        ExprResult::Value(value)
    }

    fn gen_block(&mut self, node: &'ast ExprNode) -> ExprResult {
        let Expr::Block { stmts, tail } = &node.kind else {
            unreachable!("gen_block requires a block expression");
        };
        let scope = self.ctx.info.node_scopes[&node.id];
        let pushed = self.enter_scope(scope);

        let mut result = ExprResult::None;
        for stmt in stmts {
            if !self.reachable {
                break;
            }
            self.gen_stmt(stmt);
        }
        if self.reachable {
            if let Some(tail) = tail {
                result = self.gen_expr(tail);
            }
        } else {
            result = ExprResult::Unreachable;
        }

        self.exit_scope(pushed);
        result
    }

    fn gen_if(&mut self, node: &'ast ExprNode) -> ExprResult {
        let Expr::If {
            condition,
            then_branch,
            else_branch,
        } = &node.kind
        else {
            unreachable!("gen_if requires an if expression");
        };
        let needs_value = self.ctx.info.expr_type(node.id) == crate::semantics::ExprType::Value;

        let Some(cond) = self.gen_value(condition) else {
            return ExprResult::Unreachable;
        };
        let then_block = self.new_block("if.then");
        let join_block = self.new_block("if.end");
        let else_block = else_branch.as_ref().map(|_| self.new_block("if.else"));

        self.end_block(Terminator::Branch {
            kind: BranchKind::IfTrue,
            condition: cond,
            target: then_block,
            fallthrough: else_block.unwrap_or(join_block),
        });
        self.seal(then_block);
        if let Some(else_block) = else_block {
            self.seal(else_block);
        }

        // Values arriving at the join, in predecessor order.
        let mut incoming = Vec::new();

        self.begin_block(then_block);
        let then_result = self.gen_expr(then_branch);
        if self.reachable {
            if needs_value {
                let value = match then_result {
                    ExprResult::Value(value) => value,
                    _ => self.define(RValue::Constant(Constant::Null)),
                };
                incoming.push(value);
            }
            self.end_block(Terminator::Jump { target: join_block });
        }

        if let (Some(else_block), Some(else_branch)) = (else_block, else_branch.as_deref()) {
            self.begin_block(else_block);
            let else_result = self.gen_expr(else_branch);
            if self.reachable {
                if needs_value {
                    let value = match else_result {
                        ExprResult::Value(value) => value,
                        _ => self.define(RValue::Constant(Constant::Null)),
                    };
                    incoming.push(value);
                }
                self.end_block(Terminator::Jump { target: join_block });
            }
        }

        self.seal(join_block);
        self.begin_block(join_block);
        if !self.reachable {
            return ExprResult::Unreachable;
        }

        if needs_value {
            match incoming.len() {
                1 => ExprResult::Value(incoming[0]),
                _ => {
                    debug_assert_eq!(
                        incoming.len(),
                        self.func.block(join_block).predecessor_count(),
                        "one incoming value per join predecessor"
                    );
                    let phi = self.func.make_phi(Phi {
                        operands: incoming.into_iter().collect(),
                    });
                    ExprResult::Value(self.define(RValue::Phi { phi }))
                }
            }
        } else {
            ExprResult::None
        }
    }
}
