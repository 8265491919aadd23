//! Runtime module objects.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::vm::value::{HeapId, Value};

/// A loaded module: its member slots and export map.
///
/// Import members start out as the undefined poison together with an entry
/// in `imports`; the interpreter resolves them on first access by looking
/// the named module up in the context's registry.
#[derive(Debug)]
pub struct ModuleObject {
    /// Interned name string.
    pub name: HeapId,
    pub members: Vec<Value>,
    /// Lazy imports: member slot to imported module name.
    pub imports: AHashMap<u32, HeapId>,
    /// Export map: symbol to member slot. Insertion order matches the
    /// compiled module's export table.
    pub exports: IndexMap<HeapId, u32>,
    /// Member slot of the module initializer, if it has not run yet.
    pub init: Option<u32>,
}

impl ModuleObject {
    /// Looks up an export by its symbol.
    #[must_use]
    pub fn export_slot(&self, symbol: HeapId) -> Option<u32> {
        self.exports.get(&symbol).copied()
    }
}
