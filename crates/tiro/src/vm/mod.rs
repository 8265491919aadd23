//! The virtual machine: values, heap, handles, interpreter, coroutines.

pub mod context;
pub mod error;
pub mod handles;
pub mod heap;
pub mod interpreter;
pub mod load;
pub mod methods;
pub mod objects;
pub mod scheduler;
pub mod value;

pub use context::Context;
pub use error::{ErrorKind, RunError, RunResult};
pub use handles::{Local, Root, RootStack, Scope};
pub use heap::{Heap, HeapData};
pub use objects::CoroutineState;
pub use scheduler::Scheduler;
pub use value::{HeapId, SMALL_INT_MAX, SMALL_INT_MIN, Value, ValueType};
