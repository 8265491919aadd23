//! The VM context: all process-wide state in one place.
//!
//! The context bundles the heap, the rooted-slot stack, the string and
//! symbol intern tables, the type table, the module registry and the
//! coroutine scheduler. Its constructor initializes everything (including
//! the `std` native module); dropping it tears the world down. All VM
//! operations take the context explicitly.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    bytecode::CompiledModule,
    tracer::{NoopTracer, VmTracer},
    vm::{
        error::{ErrorKind, RunError, RunResult},
        handles::{RootStack, Scope},
        heap::{Heap, HeapData},
        interpreter::{self, CoroutineStep},
        load, methods,
        objects::{Coroutine, CoroutineState, ResultObject, Str, Symbol},
        scheduler::Scheduler,
        value::{HeapId, Value, ValueType},
    },
};

/// How many allocations between collection checks.
const GC_THRESHOLD: usize = 16 * 1024;

pub struct Context {
    pub heap: Heap,
    pub roots: Rc<RootStack>,
    pub scheduler: Scheduler,
    interned: AHashMap<Box<str>, HeapId>,
    symbols: AHashMap<Box<str>, HeapId>,
    modules: AHashMap<Box<str>, HeapId>,
    /// Method table per runtime type tag.
    types: AHashMap<ValueType, HeapId>,
    /// Extra singleton roots owned by the embedder.
    globals: Vec<Value>,
    /// The currently running coroutine; a GC root while set.
    current: Option<HeapId>,
    tracer: Box<dyn VmTracer>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        let mut ctx = Self {
            heap: Heap::new(),
            roots: RootStack::new(),
            scheduler: Scheduler::new(),
            interned: AHashMap::new(),
            symbols: AHashMap::new(),
            modules: AHashMap::new(),
            types: AHashMap::new(),
            globals: Vec::new(),
            current: None,
            tracer: Box::new(NoopTracer),
        };
        methods::install(&mut ctx);
        ctx
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.tracer = tracer;
    }

    // --- interning ---

    /// Canonical interned string for `content`. Interned strings are
    /// process-wide singletons and compare by identity.
    pub fn intern_str(&mut self, content: &str) -> HeapId {
        if let Some(&id) = self.interned.get(content) {
            return id;
        }
        let mut string = Str::new(content);
        string.interned = true;
        let id = self.heap.allocate(HeapData::Str(string));
        self.interned.insert(content.into(), id);
        id
    }

    /// Canonical symbol for `name`.
    pub fn intern_symbol(&mut self, name: &str) -> HeapId {
        if let Some(&id) = self.symbols.get(name) {
            return id;
        }
        let name_id = self.intern_str(name);
        let id = self.heap.allocate(HeapData::Symbol(Symbol { name: name_id }));
        self.symbols.insert(name.into(), id);
        id
    }

    // --- types and modules ---

    pub(crate) fn set_type_table(&mut self, tag: ValueType, table: HeapId) {
        self.types.insert(tag, table);
    }

    /// Looks a method up in the type table of `tag`, keyed by the interned
    /// name string.
    #[must_use]
    pub(crate) fn method_of(&self, tag: ValueType, name: HeapId) -> Option<Value> {
        let table = self.types.get(&tag)?;
        let HeapData::InternalType(ty) = self.heap.get(*table) else {
            return None;
        };
        ty.methods.get(&name).copied()
    }

    /// The public type object for a value's type tag.
    #[must_use]
    pub(crate) fn public_type(&self, tag: ValueType) -> Option<HeapId> {
        let table = self.types.get(&tag)?;
        let HeapData::InternalType(ty) = self.heap.get(*table) else {
            return None;
        };
        Some(ty.public_type)
    }

    pub fn register_module(&mut self, name: &str, module: HeapId) {
        self.modules.insert(name.into(), module);
    }

    #[must_use]
    pub fn find_module(&self, name: &str) -> Option<HeapId> {
        self.modules.get(name).copied()
    }

    /// Loads a compiled module, registers it and runs its initializer.
    /// Fails when a module with the same name already exists.
    pub fn load(&mut self, compiled: &CompiledModule) -> RunResult<HeapId> {
        let name = compiled
            .strings
            .try_get(compiled.name)
            .unwrap_or("<module>")
            .to_owned();
        if self.modules.contains_key(name.as_str()) {
            return Err(RunError::new(
                ErrorKind::BadArgument,
                format!("a module named '{name}' is already loaded"),
            ));
        }
        let module = load::load_module(self, compiled)?;
        self.register_module(&name, module);
        load::run_module_init(self, module)?;
        Ok(module)
    }

    /// Reads an export of a loaded module by name.
    pub fn get_export(&mut self, module: HeapId, name: &str) -> Option<Value> {
        let symbol = self.intern_symbol(name);
        let HeapData::Module(data) = self.heap.get(module) else {
            return None;
        };
        let slot = data.export_slot(symbol)?;
        let value = data.members[slot as usize];
        if value == Value::Undefined {
            // Possibly an unresolved lazy import.
            return interpreter::resolve_module_member(self, module, slot).ok();
        }
        Some(value)
    }

    // --- coroutines ---

    pub fn make_coroutine(&mut self, name: &str, function: Value, args: &[Value]) -> HeapId {
        let name = self.intern_str(name);
        self.heap.allocate(HeapData::Coroutine(Coroutine {
            name,
            function,
            args: args.to_vec(),
            stack: None,
            state: CoroutineState::Ready,
            result: None,
            error: None,
            token: None,
        }))
    }

    /// Starts a coroutine for `function` and drains the ready queue. The
    /// started coroutine's completion value (or error) is returned;
    /// coroutines it launched may still be waiting afterwards.
    pub fn call_function(&mut self, function: Value, args: &[Value]) -> RunResult<Value> {
        let coroutine = self.make_coroutine("main", function, args);
        let scope = Scope::new(&self.roots);
        let rooted = scope.local(Value::Ref(coroutine));
        self.scheduler.schedule(coroutine);
        self.run_ready();

        let Value::Ref(coroutine) = rooted.get() else { unreachable!() };
        let HeapData::Coroutine(data) = self.heap.get(coroutine) else {
            unreachable!("coroutine slot holds a coroutine");
        };
        match data.state {
            CoroutineState::Done => {
                if let Some(error) = &data.error {
                    return Err(error.clone());
                }
                match data.result.and_then(Value::as_ref_id).map(|id| self.heap.get(id)) {
                    Some(HeapData::Result(ResultObject::Success(value))) => Ok(*value),
                    _ => Ok(Value::Null),
                }
            }
            state => Err(RunError::new(
                ErrorKind::UnsupportedOperation,
                format!("the called function's coroutine suspended in state {state}"),
            )),
        }
    }

    /// Calls an exported function of a loaded module.
    pub fn call_export(&mut self, module: HeapId, name: &str, args: &[Value]) -> RunResult<Value> {
        let function = self
            .get_export(module, name)
            .ok_or_else(|| RunError::new(ErrorKind::UnknownMember, format!("module has no export '{name}'")))?;
        self.call_function(function, args)
    }

    /// Runs ready coroutines one at a time until the queue drains.
    pub fn run_ready(&mut self) {
        while let Some(coroutine) = self.scheduler.next_ready() {
            if !self.heap.is_live(coroutine) {
                continue;
            }
            self.run_one(coroutine);
        }
    }

    fn run_one(&mut self, coroutine: HeapId) {
        self.set_coroutine_state(coroutine, CoroutineState::Running);
        self.current = Some(coroutine);
        let outcome = interpreter::run(self, coroutine);
        self.current = None;

        let scope = Scope::new(&self.roots);
        let rooted = scope.local(Value::Ref(coroutine));
        match outcome {
            Ok(CoroutineStep::Done(value)) => {
                let value_root = scope.local(value);
                let result = self.heap.allocate(HeapData::Result(ResultObject::Success(value_root.get())));
                let Value::Ref(coroutine) = rooted.get() else { unreachable!() };
                let HeapData::Coroutine(data) = self.heap.get_mut(coroutine) else {
                    unreachable!()
                };
                data.result = Some(Value::Ref(result));
                self.set_coroutine_state(coroutine, CoroutineState::Done);
            }
            Ok(CoroutineStep::Yield) => {
                self.scheduler.park(coroutine);
                self.set_coroutine_state(coroutine, CoroutineState::Waiting);
            }
            Err(error) => {
                self.tracer.error(&error);
                let message = self.heap.allocate(HeapData::Str(Str::new(&error.message)));
                let result = self
                    .heap
                    .allocate(HeapData::Result(ResultObject::Failure(Value::Ref(message))));
                let Value::Ref(coroutine) = rooted.get() else { unreachable!() };
                let HeapData::Coroutine(data) = self.heap.get_mut(coroutine) else {
                    unreachable!()
                };
                data.result = Some(Value::Ref(result));
                data.error = Some(error);
                self.set_coroutine_state(coroutine, CoroutineState::Done);
            }
        }
    }

    fn set_coroutine_state(&mut self, coroutine: HeapId, state: CoroutineState) {
        let HeapData::Coroutine(data) = self.heap.get_mut(coroutine) else {
            panic!("not a coroutine");
        };
        data.state = state;
        let name = data.name;
        let name = match self.heap.get(name) {
            HeapData::Str(string) => string.as_str().to_owned(),
            _ => String::new(),
        };
        self.tracer.coroutine_state(&name, state);
    }

    #[must_use]
    pub fn coroutine_state(&self, coroutine: Value) -> Option<CoroutineState> {
        let id = coroutine.as_ref_id()?;
        match self.heap.get(id) {
            HeapData::Coroutine(data) => Some(data.state),
            _ => None,
        }
    }

    /// Resumes a waiting coroutine through its token. Returns false for
    /// spurious resumes: an invalid token, or a coroutine that is not in the
    /// waiting state the token was issued for.
    pub fn resume_token(&mut self, token: Value) -> RunResult<bool> {
        let Some(token_id) = token.as_ref_id() else {
            return Err(RunError::new(ErrorKind::TypeMismatch, "expected a coroutine token"));
        };
        let HeapData::CoroutineToken(data) = self.heap.get(token_id) else {
            return Err(RunError::new(ErrorKind::TypeMismatch, "expected a coroutine token"));
        };
        if !data.valid {
            return Ok(false);
        }
        let coroutine = data.coroutine;
        let matches_waiting = match self.heap.get(coroutine) {
            HeapData::Coroutine(coro) => coro.state == CoroutineState::Waiting && coro.token == Some(token_id),
            _ => false,
        };
        if !matches_waiting {
            return Ok(false);
        }

        // Consume the token and hand the coroutine back to the scheduler.
        let HeapData::CoroutineToken(data) = self.heap.get_mut(token_id) else {
            unreachable!()
        };
        data.valid = false;
        let HeapData::Coroutine(coro) = self.heap.get_mut(coroutine) else {
            unreachable!()
        };
        coro.token = None;
        self.set_coroutine_state(coroutine, CoroutineState::Ready);
        self.scheduler.schedule(coroutine);
        Ok(true)
    }

    // --- garbage collection ---

    /// Runs a collection when enough allocations piled up. Only called at
    /// safe points (instruction boundaries, allocation sites).
    pub fn maybe_collect(&mut self) {
        if self.heap.allocated_since_gc() >= GC_THRESHOLD {
            self.collect_garbage();
        }
    }

    pub fn collect_garbage(&mut self) {
        let live_before = self.heap.live_objects();
        let mut roots: Vec<Value> = Vec::new();
        roots.extend(self.roots.roots());
        roots.extend(self.globals.iter().copied());
        roots.extend(self.interned.values().map(|&id| Value::Ref(id)));
        roots.extend(self.symbols.values().map(|&id| Value::Ref(id)));
        roots.extend(self.modules.values().map(|&id| Value::Ref(id)));
        roots.extend(self.types.values().map(|&id| Value::Ref(id)));
        roots.extend(self.scheduler.roots().map(Value::Ref));
        if let Some(current) = self.current {
            roots.push(Value::Ref(current));
        }
        self.heap.collect(roots);
        self.scheduler.purge_dead(&self.heap);
        self.tracer.collection(live_before, self.heap.live_objects());
    }

    /// Registers an embedder-owned singleton root.
    pub fn add_global(&mut self, value: Value) -> usize {
        self.globals.push(value);
        self.globals.len() - 1
    }

    /// The currently running coroutine, if the call happens inside a native
    /// function.
    #[must_use]
    pub fn current_coroutine(&self) -> Option<HeapId> {
        self.current
    }

    /// Human-readable rendering of a value, as used by `print` and string
    /// formatting.
    #[must_use]
    pub fn render(&self, value: Value) -> String {
        methods::value_to_string(&self.heap, value)
    }

    /// The runtime type tag of a value.
    #[must_use]
    pub fn type_of(&self, value: Value) -> ValueType {
        self.heap.value_type(value)
    }

    /// Copies a Rust string into the heap (not interned).
    pub fn new_string(&mut self, content: &str) -> Value {
        Value::Ref(self.heap.allocate(HeapData::Str(Str::new(content))))
    }

    /// Reads string content out of a string or string slice value.
    #[must_use]
    pub fn as_str(&self, value: Value) -> Option<&str> {
        self.heap.as_str(value)
    }

    /// Reads an integer out of an inline or boxed integer value.
    #[must_use]
    pub fn as_int(&self, value: Value) -> Option<i64> {
        self.heap.as_int(value)
    }

    /// Wraps an integer, boxing when it exceeds the inline range.
    pub fn new_int(&mut self, value: i64) -> Value {
        self.heap.box_int(value)
    }
}
