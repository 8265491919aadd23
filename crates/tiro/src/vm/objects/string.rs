//! String-like heap objects.
//!
//! Strings are immutable UTF-8 byte sequences with a lazily computed cached
//! hash and an interned flag. The context keeps a process-wide intern table
//! mapping content to a canonical instance; interned strings compare by
//! identity. A [`StrSlice`] is a view `(backing, offset, length)` that keeps
//! its backing string alive through tracing.

use std::{
    cell::Cell,
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use crate::vm::value::HeapId;

/// Content hash shared by strings and slices, so a slice hashes equal to a
/// string with the same content. Zero is reserved as the "unset" marker of
/// the per-string cache.
#[must_use]
pub fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish().max(1)
}

/// An immutable string.
#[derive(Debug)]
pub struct Str {
    content: Box<str>,
    /// Cached content hash; zero means "not yet computed".
    hash: Cell<u64>,
    pub interned: bool,
}

impl Str {
    #[must_use]
    pub fn new(content: &str) -> Self {
        Self {
            content: content.into(),
            hash: Cell::new(0),
            interned: false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.content.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Content hash, computed on first use and cached on the string.
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        let cached = self.hash.get();
        if cached != 0 {
            return cached;
        }
        let value = content_hash(&self.content);
        self.hash.set(value);
        value
    }
}

/// A mutable string accumulator, used by the formatter instructions.
#[derive(Debug, Default)]
pub struct StrBuilder {
    pub buffer: String,
}

impl StrBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, text: &str) {
        self.buffer.push_str(text);
    }
}

/// An immutable `(backing, offset, length)` view into a string. The backing
/// string stays alive as long as the slice does.
#[derive(Debug)]
pub struct StrSlice {
    pub backing: HeapId,
    pub offset: u32,
    pub length: u32,
}

/// A symbol: identity-compared name. The payload is the interned name
/// string, so two symbols with equal content share it.
#[derive(Debug)]
pub struct Symbol {
    pub name: HeapId,
}
