//! The runtime value representation.
//!
//! A [`Value`] is a word-sized tagged cell. Small integers, booleans, null
//! and the undefined poison are stored inline; everything else is a
//! [`HeapId`] into the slot arena. The type of any value is derivable in
//! O(1): inline values carry their tag, heap values answer through their
//! slot's data variant.
//!
//! Integers inside [`SMALL_INT_MIN`]..=[`SMALL_INT_MAX`] must be
//! represented inline; arithmetic producing results outside the range
//! transparently boxes into a heap `Integer`.

use strum::{Display, IntoStaticStr};

/// Index of a heap object in the slot arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(pub u32);

impl HeapId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Inline small integer range: 62 bits, mirroring a two-bit pointer tag.
pub const SMALL_INT_MIN: i64 = -(1 << 61);
pub const SMALL_INT_MAX: i64 = (1 << 61) - 1;

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// The sole "absent" value; equal only to itself.
    Null,
    /// Poison for reads of captured variables before their definition.
    Undefined,
    Bool(bool),
    /// An integer within the inline range.
    SmallInt(i64),
    Ref(HeapId),
}

impl Value {
    /// Wraps an integer, assuming it fits inline. Arithmetic uses
    /// `Heap::box_int` instead, which falls back to boxing.
    #[inline]
    #[must_use]
    pub fn small_int(value: i64) -> Self {
        debug_assert!((SMALL_INT_MIN..=SMALL_INT_MAX).contains(&value));
        Self::SmallInt(value)
    }

    #[inline]
    #[must_use]
    pub fn is_null(self) -> bool {
        matches!(self, Self::Null)
    }

    #[inline]
    #[must_use]
    pub fn as_ref_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// The closed set of runtime type tags. Every heap object layout maps to
/// exactly one tag; inline values map to `Null`, `Undefined`, `Boolean` and
/// `Integer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ValueType {
    Null,
    Undefined,
    Boolean,
    Integer,
    Float,
    String,
    StringBuilder,
    StringSlice,
    Symbol,
    Tuple,
    Array,
    ArrayStorage,
    HashTable,
    HashTableStorage,
    HashTableIterator,
    Buffer,
    Record,
    Set,
    Module,
    Code,
    FunctionTemplate,
    Function,
    BoundMethod,
    Environment,
    Coroutine,
    CoroutineStack,
    CoroutineToken,
    Result,
    Type,
    InternalType,
    Method,
    NativeFunction,
    NativePointer,
    DynamicObject,
}
