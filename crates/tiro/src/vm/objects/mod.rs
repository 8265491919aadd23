//! Heap object layouts.
//!
//! Every struct here is the payload of exactly one [`HeapData`] variant and
//! therefore of one runtime type tag. Outgoing references are [`Value`]s or
//! [`HeapId`]s; the single place that knows each layout's reference graph is
//! the heap's trace walker.
//!
//! [`HeapData`]: crate::vm::heap::HeapData

pub mod containers;
pub mod coroutine;
pub mod function;
pub mod module;
pub mod string;

pub use containers::{Array, ArrayStorage, Buffer, HashTable, HashTableIterator, HashTableStorage, Record, Set, Tuple};
pub use coroutine::{Coroutine, CoroutineStack, CoroutineState, CoroutineToken, FRAME_POP_ONE_MORE, Frame};
pub use function::{BoundMethod, Code, Environment, FunctionObject, FunctionTemplate, Method, NativeFunction};
pub use module::ModuleObject;
pub use string::{Str, StrBuilder, StrSlice, Symbol};

use indexmap::IndexMap;

use crate::vm::value::{HeapId, Value};

/// A completed or failed computation, as produced by coroutines and
/// assertion machinery.
#[derive(Debug)]
pub enum ResultObject {
    Success(Value),
    Failure(Value),
}

/// A user-visible type object, answering `type_of` queries.
#[derive(Debug)]
pub struct TypeObject {
    /// Interned string with the type's name.
    pub name: HeapId,
}

/// Per-type method table. One instance exists per runtime type tag; lookup
/// keys are interned name strings.
#[derive(Debug)]
pub struct InternalType {
    /// The public type object handed out to user code.
    pub public_type: HeapId,
    pub methods: IndexMap<HeapId, Value>,
}

/// An opaque host pointer, carried through the VM without interpretation.
#[derive(Debug)]
pub struct NativePointer {
    pub address: usize,
}

/// An object with dynamic, symbol-keyed properties.
#[derive(Debug, Default)]
pub struct DynamicObject {
    /// Keyed by interned name string.
    pub properties: IndexMap<HeapId, Value>,
}
