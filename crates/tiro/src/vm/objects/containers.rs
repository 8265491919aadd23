//! Container heap objects.
//!
//! Arrays and hash tables split into a handle object and a storage object,
//! so the handle can stay put while its storage is swapped on growth. Hash
//! tables are insertion-ordered: entries live in a vector (with tombstones
//! after removal), and a hash index maps content hashes to entry slots.
//! Key equality is decided by the caller through a heap-aware comparison,
//! which keeps the storage free of heap borrows.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::vm::value::{HeapId, Value};

/// Array handle; elements live in the referenced storage.
#[derive(Debug)]
pub struct Array {
    pub storage: HeapId,
}

#[derive(Debug, Default)]
pub struct ArrayStorage {
    pub items: Vec<Value>,
}

/// Fixed-size immutable sequence.
#[derive(Debug)]
pub struct Tuple {
    pub items: Vec<Value>,
}

/// A record: fixed symbol-keyed schema plus one value per key.
#[derive(Debug)]
pub struct Record {
    /// Interned name strings, in schema order.
    pub keys: Vec<HeapId>,
    pub values: Vec<Value>,
}

impl Record {
    #[must_use]
    pub fn field_index(&self, name: HeapId) -> Option<usize> {
        self.keys.iter().position(|&key| key == name)
    }
}

/// Mutable byte buffer.
#[derive(Debug)]
pub struct Buffer {
    pub bytes: Vec<u8>,
}

/// Hash table handle; entries live in the referenced storage.
#[derive(Debug)]
pub struct HashTable {
    pub storage: HeapId,
}

/// Set handle; reuses the hash table storage layout with null values.
#[derive(Debug)]
pub struct Set {
    pub storage: HeapId,
}

/// Iterator over a hash table's live entries in insertion order.
#[derive(Debug)]
pub struct HashTableIterator {
    pub table: HeapId,
    /// Next entry slot to visit.
    pub position: u32,
}

/// Insertion-ordered hash storage with tombstones.
#[derive(Debug, Default)]
pub struct HashTableStorage {
    pub entries: Vec<Option<(Value, Value)>>,
    /// Content hash to candidate entry slots.
    index: AHashMap<u64, SmallVec<[u32; 2]>>,
    len: usize,
}

impl HashTableStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entry slots whose keys hash to `hash`. The caller decides equality.
    #[must_use]
    pub fn candidates(&self, hash: u64) -> &[u32] {
        self.index.get(&hash).map_or(&[], SmallVec::as_slice)
    }

    /// Appends a new entry; the caller has verified the key is absent.
    pub fn insert_new(&mut self, hash: u64, key: Value, value: Value) {
        let slot = self.entries.len() as u32;
        self.entries.push(Some((key, value)));
        self.index.entry(hash).or_default().push(slot);
        self.len += 1;
    }

    pub fn replace(&mut self, slot: u32, value: Value) {
        let entry = self.entries[slot as usize]
            .as_mut()
            .expect("replace requires a live entry");
        entry.1 = value;
    }

    pub fn remove(&mut self, hash: u64, slot: u32) -> Option<(Value, Value)> {
        let removed = self.entries[slot as usize].take();
        if removed.is_some() {
            self.len -= 1;
            if let Some(slots) = self.index.get_mut(&hash) {
                slots.retain(|&mut s| s != slot);
                if slots.is_empty() {
                    self.index.remove(&hash);
                }
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.len = 0;
    }

    /// Live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries.iter().filter_map(|entry| *entry)
    }
}
