//! Lowering from the typed AST into SSA IR.
//!
//! Module lowering happens in two steps. First, every file-scope symbol gets
//! a module member up front, so bodies can reference functions and module
//! variables regardless of declaration order. Second, a worklist of function
//! jobs is drained: top-level functions first, then every closure literal
//! encountered while lowering an enclosing function. Closure jobs carry the
//! environment that was active at their creation point, which ties the
//! nested function's captured variable accesses to the right environment
//! chain (see [`env::ClosureEnvCollection`]).
//!
//! Module-level variable initializers are collected into a synthesized
//! module initializer function that the runtime invokes once at load time.

pub mod env;
pub mod func;

use std::collections::VecDeque;

use ahash::AHashMap;

use crate::{
    ast::{AstId, Binding, Decl, File, FuncDecl},
    diagnostics::Diagnostics,
    intern::{InternedString, StringTable},
    ir::{
        Function, FunctionId, FunctionKind, ModuleMemberId,
        module::{Module, ModuleMember, ModuleMemberData},
    },
    irgen::env::{ClosureEnvCollection, EnvId},
    semantics::{ScopeId, SemanticInfo, SymbolId},
};

/// A queued function lowering task.
struct FunctionJob<'ast> {
    /// Pre-allocated id; the placeholder function is replaced when the job
    /// completes.
    func: FunctionId,
    decl: &'ast FuncDecl,
    /// The node that owns the function's parameter scope.
    node: AstId,
    /// The innermost environment at the closure's creation point.
    outer_env: Option<EnvId>,
}

/// Shared state for one module lowering.
pub struct ModuleCtx<'ast> {
    pub module: Module,
    pub strings: &'ast mut StringTable,
    pub diagnostics: &'ast mut Diagnostics,
    pub info: &'ast SemanticInfo,
    pub source: &'ast str,
    pub envs: ClosureEnvCollection,
    /// Module member of every file-scope symbol.
    pub symbol_members: AHashMap<SymbolId, ModuleMemberId>,
    /// Module member of every lowered function.
    pub function_members: AHashMap<FunctionId, ModuleMemberId>,
    /// Captured symbols grouped by their declaring scope, in declaration
    /// order. Drives environment creation on scope entry.
    pub captured_by_scope: AHashMap<ScopeId, Vec<SymbolId>>,
    jobs: VecDeque<FunctionJob<'ast>>,
}

impl<'ast> ModuleCtx<'ast> {
    /// Queues a function for lowering and returns its pre-allocated id.
    pub fn queue_function(
        &mut self,
        decl: &'ast FuncDecl,
        node: AstId,
        kind: FunctionKind,
        outer_env: Option<EnvId>,
    ) -> FunctionId {
        let name = if decl.name.is_valid() {
            decl.name
        } else {
            let label = format!("closure-{}", self.module.function_count());
            self.strings.insert(&label)
        };
        let params = u32::try_from(decl.params.len()).expect("parameter count overflow");
        let placeholder = Function::new(name, kind, params, self.strings);
        let func = self.module.make_function(placeholder);
        let member = self.module.make_member(ModuleMember {
            data: ModuleMemberData::Function { id: func },
            exported: false,
            name,
        });
        self.function_members.insert(func, member);
        self.jobs.push_back(FunctionJob {
            func,
            decl,
            node,
            outer_env,
        });
        func
    }
}

/// Lowers a checked file to an IR module.
pub fn lower_module(
    file: &File,
    module_name: InternedString,
    source: &str,
    strings: &mut StringTable,
    info: &SemanticInfo,
    diagnostics: &mut Diagnostics,
) -> Module {
    let mut captured_by_scope: AHashMap<ScopeId, Vec<SymbolId>> = AHashMap::new();
    for scope in info.symbols.scope_ids() {
        for &symbol in info.symbols.scope(scope).symbols() {
            if info.symbols.symbol(symbol).captured {
                captured_by_scope.entry(scope).or_default().push(symbol);
            }
        }
    }

    let mut ctx = ModuleCtx {
        module: Module::new(module_name),
        strings,
        diagnostics,
        info,
        source,
        envs: ClosureEnvCollection::new(),
        symbol_members: AHashMap::new(),
        function_members: AHashMap::new(),
        captured_by_scope,
        jobs: VecDeque::new(),
    };

    // Step 1: one module member per file-scope symbol.
    let mut module_bindings = Vec::new();
    for item in &file.items {
        if item.has_error {
            continue;
        }
        match &item.kind {
            Decl::Import(import) => {
                let member = ctx.module.make_member(ModuleMember {
                    data: ModuleMemberData::Import { name: import.module },
                    exported: import.exported,
                    name: import.module,
                });
                for &symbol in ctx.info.symbols_of_decl(item.id) {
                    ctx.symbol_members.insert(symbol, member);
                }
            }
            Decl::Func(decl) => {
                let func = ctx.queue_function(decl, item.id, FunctionKind::Normal, None);
                let member = ctx.function_members[&func];
                ctx.module.member_mut(member).exported = decl.exported;
                for &symbol in ctx.info.symbols_of_decl(item.id) {
                    ctx.symbol_members.insert(symbol, member);
                }
            }
            Decl::Var(var) => {
                for binding in &var.bindings {
                    if binding.has_error {
                        continue;
                    }
                    let names: Vec<InternedString> = match &binding.kind {
                        Binding::Var { name, .. } => vec![*name],
                        Binding::Tuple { names, .. } => names.iter().map(|(name, _)| *name).collect(),
                    };
                    for (&symbol, name) in ctx.info.symbols_of_decl(binding.id).iter().zip(names) {
                        let member = ctx.module.make_member(ModuleMember {
                            data: ModuleMemberData::Variable { name },
                            exported: var.exported,
                            name,
                        });
                        ctx.symbol_members.insert(symbol, member);
                    }
                    module_bindings.push(binding);
                }
            }
        }
    }

    // Step 2: the module initializer, when module state needs one.
    if !module_bindings.is_empty() {
        let init_name = ctx.strings.insert("<init>");
        let placeholder = Function::new(init_name, FunctionKind::Normal, 0, ctx.strings);
        let init_func = ctx.module.make_function(placeholder);
        let init_member = ctx.module.make_member(ModuleMember {
            data: ModuleMemberData::Function { id: init_func },
            exported: false,
            name: init_name,
        });
        ctx.function_members.insert(init_func, init_member);
        ctx.module.init = Some(init_member);

        let lowered = func::FunctionIrGen::new(&mut ctx, init_name, FunctionKind::Normal, 0, None)
            .lower_module_init(&module_bindings);
        *ctx.module.function_mut(init_func) = lowered;
    }

    // Step 3: drain the worklist. Closures queued while lowering land at
    // the back and see the environment locations their parents assigned.
    while let Some(job) = ctx.jobs.pop_front() {
        let kind = if job.outer_env.is_some() {
            FunctionKind::Closure
        } else {
            ctx.module.function(job.func).kind
        };
        let name = ctx.module.function(job.func).name;
        let params = ctx.module.function(job.func).params;
        let lowered =
            func::FunctionIrGen::new(&mut ctx, name, kind, params, job.outer_env).lower(job.decl, job.node);
        *ctx.module.function_mut(job.func) = lowered;
    }

    ctx.module
}
