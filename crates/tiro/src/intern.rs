//! Compile-time string interning.
//!
//! The [`StringTable`] stores one immutable copy per distinct byte content
//! and hands out small [`InternedString`] ids. All identifier handling in the
//! compiler (symbol names, member names, module names) goes through ids, so
//! name equality is a single integer compare. Index `0` is reserved as the
//! invalid id, which lets `InternedString::default()` mean "no name".
//!
//! The runtime has its own interning of heap `Str` objects; this table only
//! lives for the duration of a compilation and inside compiled artifacts.

use ahash::AHashMap;

/// Id of an interned string. `0` is the reserved invalid id.
///
/// Uses `u32` to keep ids compact in IR tables and bytecode immediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct InternedString(u32);

impl InternedString {
    /// Reconstructs an id from a raw index, e.g. when decoding bytecode.
    /// The caller is responsible for the index being valid for its table.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// True for every id handed out by a table, false for the default id.
    #[inline]
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Owning table of distinct strings, indexed by [`InternedString`].
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct StringTable {
    // storage[0] is a placeholder for the invalid id so lookups stay branch-free
    storage: Vec<Box<str>>,
    #[serde(skip)]
    index: AHashMap<Box<str>, u32>,
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: vec![String::new().into_boxed_str()],
            index: AHashMap::new(),
        }
    }

    /// Interns `content`, returning the existing id when the content was seen
    /// before and a fresh id otherwise.
    pub fn insert(&mut self, content: &str) -> InternedString {
        if let Some(&id) = self.index.get(content) {
            return InternedString(id);
        }
        let id = u32::try_from(self.storage.len()).expect("string table overflow");
        let boxed: Box<str> = content.into();
        self.storage.push(boxed.clone());
        self.index.insert(boxed, id);
        InternedString(id)
    }

    /// Returns the content for a valid id.
    ///
    /// Panics when called with the invalid id or an id from another table.
    #[must_use]
    pub fn get(&self, id: InternedString) -> &str {
        debug_assert!(id.is_valid(), "cannot resolve the invalid string id");
        &self.storage[id.0 as usize]
    }

    /// Content lookup that tolerates the invalid id.
    #[must_use]
    pub fn try_get(&self, id: InternedString) -> Option<&str> {
        if id.is_valid() { self.storage.get(id.0 as usize).map(AsRef::as_ref) } else { None }
    }

    /// Number of distinct strings (not counting the reserved slot).
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len() - 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds the content index after deserialization.
    ///
    /// The map is not serialized; artifacts that travel through postcard call
    /// this once before interning anything new.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .storage
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, s)| (s.clone(), i as u32))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut table = StringTable::new();
        let a = table.insert("hello");
        let b = table.insert("hello");
        let c = table.insert("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.get(a), "hello");
        assert_eq!(table.get(c), "world");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn default_id_is_invalid() {
        let id = InternedString::default();
        assert!(!id.is_valid());
        let table = StringTable::new();
        assert_eq!(table.try_get(id), None);
    }

    #[test]
    fn empty_string_interns_like_any_other() {
        let mut table = StringTable::new();
        let id = table.insert("");
        assert!(id.is_valid());
        assert_eq!(table.get(id), "");
    }
}
