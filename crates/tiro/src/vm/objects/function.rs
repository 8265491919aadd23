//! Function-like heap objects: compiled code, templates, closures, bound
//! methods, closure environments and native functions.

use std::rc::Rc;

use crate::vm::{
    context::Context,
    error::RunResult,
    value::{HeapId, Value},
};

/// Compiled bytecode. The bytes are reference-counted so the dispatch loop
/// can hold them without borrowing the heap.
#[derive(Debug)]
pub struct Code {
    pub bytes: Rc<[u8]>,
}

/// The immutable description of a compiled function: name, arity, frame
/// size and code. Function objects instantiate a template with a concrete
/// closure environment.
#[derive(Debug)]
pub struct FunctionTemplate {
    /// Interned name string.
    pub name: HeapId,
    /// The module the function belongs to.
    pub module: HeapId,
    pub code: HeapId,
    pub params: u32,
    pub locals: u32,
}

/// A callable function: a template plus its captured environment (null for
/// plain functions).
#[derive(Debug)]
pub struct FunctionObject {
    pub template: HeapId,
    pub env: Value,
}

/// A method bound to its receiver, created when a method is read as a plain
/// member.
#[derive(Debug)]
pub struct BoundMethod {
    pub function: Value,
    pub instance: Value,
}

/// A chain of heap cells shared by closures capturing the same variables.
/// Slots start as the undefined poison until their definition runs.
#[derive(Debug)]
pub struct Environment {
    pub parent: Value,
    pub slots: Vec<Value>,
}

impl Environment {
    #[must_use]
    pub fn new(parent: Value, size: u32) -> Self {
        Self {
            parent,
            slots: vec![Value::Undefined; size as usize],
        }
    }
}

/// Entry of a type's method table that requires a receiver. Reading it as a
/// member produces a bound method; calling it through the method-call
/// protocol passes the instance directly.
#[derive(Debug)]
pub struct Method {
    pub function: Value,
}

/// Outcome of a native call: a plain value, or a request to park the
/// current coroutine (it resumes with null when its token fires).
#[derive(Debug)]
pub enum NativeResult {
    Value(Value),
    Yield,
}

/// Calling convention for natives: context, receiver (null for free
/// functions) and the argument slice.
pub type NativeFn = fn(&mut Context, Value, &[Value]) -> RunResult<NativeResult>;

/// A function implemented by the host.
pub struct NativeFunction {
    pub name: &'static str,
    pub params: u32,
    pub func: NativeFn,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}
