//! The garbage-collected heap.
//!
//! Objects live in an id-indexed slot arena; [`HeapId`] is the pointer.
//! Collection is mark-and-sweep: marking starts from the roots the caller
//! provides and dispatches per type tag to [`trace`], the single place each
//! layout's outgoing references are encoded. Sweeping walks the slot vector
//! and returns unmarked slots to the free list. Objects never move, so ids
//! stay valid for the object's whole lifetime.
//!
//! Collection may only run between interpreter instructions; allocation
//! sites and the top of the dispatch loop are the safe points.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::vm::{
    error::{ErrorKind, RunError, RunResult},
    objects::{
        Array, ArrayStorage, BoundMethod, Buffer, Code, Coroutine, CoroutineStack, CoroutineToken, DynamicObject,
        Environment, FunctionObject, FunctionTemplate, HashTable, HashTableIterator, HashTableStorage, InternalType,
        Method, ModuleObject, NativeFunction, NativePointer, Record, ResultObject, Set, Str, StrBuilder, StrSlice,
        Symbol, Tuple, TypeObject,
    },
    value::{HeapId, SMALL_INT_MAX, SMALL_INT_MIN, Value, ValueType},
};

/// Payload of one heap object. Each variant corresponds to exactly one
/// [`ValueType`] tag.
#[derive(Debug)]
pub enum HeapData {
    /// A boxed integer outside the inline range.
    Integer(i64),
    Float(f64),
    Str(Str),
    StrBuilder(StrBuilder),
    StrSlice(StrSlice),
    Symbol(Symbol),
    Tuple(Tuple),
    Array(Array),
    ArrayStorage(ArrayStorage),
    HashTable(HashTable),
    HashTableStorage(HashTableStorage),
    HashTableIterator(HashTableIterator),
    Buffer(Buffer),
    Record(Record),
    Set(Set),
    Module(ModuleObject),
    Code(Code),
    FunctionTemplate(FunctionTemplate),
    Function(FunctionObject),
    BoundMethod(BoundMethod),
    Environment(Environment),
    Coroutine(Coroutine),
    CoroutineStack(CoroutineStack),
    CoroutineToken(CoroutineToken),
    Result(ResultObject),
    Type(TypeObject),
    InternalType(InternalType),
    Method(Method),
    NativeFunction(NativeFunction),
    NativePointer(NativePointer),
    DynamicObject(DynamicObject),
}

impl HeapData {
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Integer(_) => ValueType::Integer,
            Self::Float(_) => ValueType::Float,
            Self::Str(_) => ValueType::String,
            Self::StrBuilder(_) => ValueType::StringBuilder,
            Self::StrSlice(_) => ValueType::StringSlice,
            Self::Symbol(_) => ValueType::Symbol,
            Self::Tuple(_) => ValueType::Tuple,
            Self::Array(_) => ValueType::Array,
            Self::ArrayStorage(_) => ValueType::ArrayStorage,
            Self::HashTable(_) => ValueType::HashTable,
            Self::HashTableStorage(_) => ValueType::HashTableStorage,
            Self::HashTableIterator(_) => ValueType::HashTableIterator,
            Self::Buffer(_) => ValueType::Buffer,
            Self::Record(_) => ValueType::Record,
            Self::Set(_) => ValueType::Set,
            Self::Module(_) => ValueType::Module,
            Self::Code(_) => ValueType::Code,
            Self::FunctionTemplate(_) => ValueType::FunctionTemplate,
            Self::Function(_) => ValueType::Function,
            Self::BoundMethod(_) => ValueType::BoundMethod,
            Self::Environment(_) => ValueType::Environment,
            Self::Coroutine(_) => ValueType::Coroutine,
            Self::CoroutineStack(_) => ValueType::CoroutineStack,
            Self::CoroutineToken(_) => ValueType::CoroutineToken,
            Self::Result(_) => ValueType::Result,
            Self::Type(_) => ValueType::Type,
            Self::InternalType(_) => ValueType::InternalType,
            Self::Method(_) => ValueType::Method,
            Self::NativeFunction(_) => ValueType::NativeFunction,
            Self::NativePointer(_) => ValueType::NativePointer,
            Self::DynamicObject(_) => ValueType::DynamicObject,
        }
    }
}

struct Slot {
    data: Option<HeapData>,
    marked: bool,
}

/// Allocation arena plus mark-and-sweep collector state.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    /// Allocations since the last collection, for the growth heuristic.
    allocated_since_gc: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            allocated_since_gc: 0,
        }
    }

    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        self.live += 1;
        self.allocated_since_gc += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.data.is_none());
            slot.data = Some(data);
            slot.marked = false;
            return HeapId(index);
        }
        let index = u32::try_from(self.slots.len()).expect("heap id overflow");
        self.slots.push(Slot {
            data: Some(data),
            marked: false,
        });
        HeapId(index)
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.slots[id.index()].data.as_ref().expect("use of a dead heap object")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.slots[id.index()].data.as_mut().expect("use of a dead heap object")
    }

    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.slots.get(id.index()).is_some_and(|slot| slot.data.is_some())
    }

    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.live
    }

    #[must_use]
    pub fn allocated_since_gc(&self) -> usize {
        self.allocated_since_gc
    }

    #[must_use]
    pub fn value_type(&self, value: Value) -> ValueType {
        match value {
            Value::Null => ValueType::Null,
            Value::Undefined => ValueType::Undefined,
            Value::Bool(_) => ValueType::Boolean,
            Value::SmallInt(_) => ValueType::Integer,
            Value::Ref(id) => self.get(id).value_type(),
        }
    }

    /// Wraps an integer, boxing it when it exceeds the inline range.
    pub fn box_int(&mut self, value: i64) -> Value {
        if (SMALL_INT_MIN..=SMALL_INT_MAX).contains(&value) {
            Value::SmallInt(value)
        } else {
            Value::Ref(self.allocate(HeapData::Integer(value)))
        }
    }

    /// The integer payload of a value, inline or boxed.
    #[must_use]
    pub fn as_int(&self, value: Value) -> Option<i64> {
        match value {
            Value::SmallInt(int) => Some(int),
            Value::Ref(id) => match self.get(id) {
                HeapData::Integer(int) => Some(*int),
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self, value: Value) -> Option<f64> {
        match value {
            Value::Ref(id) => match self.get(id) {
                HeapData::Float(float) => Some(*float),
                _ => None,
            },
            _ => None,
        }
    }

    /// String content of a `Str` or `StrSlice` value.
    #[must_use]
    pub fn as_str(&self, value: Value) -> Option<&str> {
        let id = value.as_ref_id()?;
        match self.get(id) {
            HeapData::Str(string) => Some(string.as_str()),
            HeapData::StrSlice(slice) => {
                let HeapData::Str(backing) = self.get(slice.backing) else {
                    return None;
                };
                backing
                    .as_str()
                    .get(slice.offset as usize..(slice.offset + slice.length) as usize)
            }
            _ => None,
        }
    }

    /// Content hash for hash table keys. Hashable: null, booleans, numbers,
    /// strings and symbols.
    pub fn key_hash(&self, value: Value) -> RunResult<u64> {
        let mut hasher = DefaultHasher::new();
        match value {
            Value::Null => 0u8.hash(&mut hasher),
            Value::Bool(flag) => (1u8, flag).hash(&mut hasher),
            Value::SmallInt(int) => (2u8, int).hash(&mut hasher),
            Value::Ref(id) => match self.get(id) {
                HeapData::Integer(int) => (2u8, *int).hash(&mut hasher),
                HeapData::Float(float) => (3u8, float.to_bits()).hash(&mut hasher),
                // Strings reuse their cached content hash; slices hash their
                // view with the same function so equal content collides.
                HeapData::Str(string) => (4u8, string.hash_value()).hash(&mut hasher),
                HeapData::StrSlice(_) => {
                    let content = self.as_str(value).expect("string content");
                    (4u8, crate::vm::objects::string::content_hash(content)).hash(&mut hasher);
                }
                HeapData::Symbol(symbol) => (5u8, symbol.name.0).hash(&mut hasher),
                other => {
                    return Err(RunError::new(
                        ErrorKind::TypeMismatch,
                        format!("values of type {} cannot be hashed", other.value_type()),
                    ));
                }
            },
            Value::Undefined => {
                return Err(RunError::new(ErrorKind::UndefinedValue, "cannot hash the undefined value"));
            }
        }
        Ok(hasher.finish())
    }

    /// Structural equality for numbers and strings, identity otherwise.
    /// Interned strings are canonical, so identity decides for them without
    /// touching their content.
    #[must_use]
    pub fn values_equal(&self, left: Value, right: Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_int(left), self.as_int(right)) {
            return a == b;
        }
        match (self.numeric(left), self.numeric(right)) {
            (Some(a), Some(b)) => return a == b,
            (Some(_), None) | (None, Some(_)) => return false,
            (None, None) => {}
        }
        if let (Value::Ref(a), Value::Ref(b)) = (left, right)
            && let (HeapData::Str(first), HeapData::Str(second)) = (self.get(a), self.get(b))
            && first.interned
            && second.interned
        {
            return a == b;
        }
        if let (Some(a), Some(b)) = (self.as_str(left), self.as_str(right)) {
            return a == b;
        }
        match (left, right) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }

    /// Numeric view of integers and floats.
    #[must_use]
    pub fn numeric(&self, value: Value) -> Option<f64> {
        if let Some(int) = self.as_int(value) {
            return Some(int as f64);
        }
        self.as_float(value)
    }

    // --- collection ---

    /// Runs a full mark-and-sweep collection with the given roots.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) {
        for slot in &mut self.slots {
            slot.marked = false;
        }

        let mut work: Vec<HeapId> = roots
            .into_iter()
            .filter_map(Value::as_ref_id)
            .collect();
        while let Some(id) = work.pop() {
            let slot = &mut self.slots[id.index()];
            if slot.marked || slot.data.is_none() {
                continue;
            }
            slot.marked = true;
            // Marking happens in two steps so the trace walker only needs a
            // shared borrow of the slot data.
            let data = self.slots[id.index()].data.as_ref().expect("marked slot is live");
            trace(data, |value| {
                if let Value::Ref(child) = value {
                    work.push(child);
                }
            });
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.data.is_some() && !slot.marked {
                slot.data = None;
                self.free.push(index as u32);
                self.live -= 1;
            }
        }
        self.allocated_since_gc = 0;
    }
}

/// Enumerates every outgoing reference of one object. This is the only
/// place each layout's reference graph is encoded.
pub fn trace(data: &HeapData, mut f: impl FnMut(Value)) {
    match data {
        HeapData::Integer(_)
        | HeapData::Float(_)
        | HeapData::Str(_)
        | HeapData::StrBuilder(_)
        | HeapData::Buffer(_)
        | HeapData::NativeFunction(_)
        | HeapData::NativePointer(_) => {}
        HeapData::StrSlice(slice) => f(Value::Ref(slice.backing)),
        HeapData::Symbol(symbol) => f(Value::Ref(symbol.name)),
        HeapData::Tuple(tuple) => {
            for &item in &tuple.items {
                f(item);
            }
        }
        HeapData::Array(array) => f(Value::Ref(array.storage)),
        HeapData::ArrayStorage(storage) => {
            for &item in &storage.items {
                f(item);
            }
        }
        HeapData::HashTable(table) => f(Value::Ref(table.storage)),
        HeapData::Set(set) => f(Value::Ref(set.storage)),
        HeapData::HashTableStorage(storage) => {
            for (key, value) in storage.iter() {
                f(key);
                f(value);
            }
        }
        HeapData::HashTableIterator(iterator) => f(Value::Ref(iterator.table)),
        HeapData::Record(record) => {
            for &key in &record.keys {
                f(Value::Ref(key));
            }
            for &value in &record.values {
                f(value);
            }
        }
        HeapData::Module(module) => {
            f(Value::Ref(module.name));
            for &member in &module.members {
                f(member);
            }
            for &name in module.imports.values() {
                f(Value::Ref(name));
            }
            for (&symbol, _) in &module.exports {
                f(Value::Ref(symbol));
            }
        }
        HeapData::Code(_) => {}
        HeapData::FunctionTemplate(template) => {
            f(Value::Ref(template.name));
            f(Value::Ref(template.module));
            f(Value::Ref(template.code));
        }
        HeapData::Function(function) => {
            f(Value::Ref(function.template));
            f(function.env);
        }
        HeapData::BoundMethod(method) => {
            f(method.function);
            f(method.instance);
        }
        HeapData::Environment(environment) => {
            f(environment.parent);
            for &slot in &environment.slots {
                f(slot);
            }
        }
        HeapData::Coroutine(coroutine) => {
            f(Value::Ref(coroutine.name));
            f(coroutine.function);
            for &arg in &coroutine.args {
                f(arg);
            }
            if let Some(stack) = coroutine.stack {
                f(Value::Ref(stack));
            }
            if let Some(result) = coroutine.result {
                f(result);
            }
            if let Some(token) = coroutine.token {
                f(Value::Ref(token));
            }
        }
        HeapData::CoroutineStack(stack) => {
            for &value in &stack.values {
                f(value);
            }
            for frame in &stack.frames {
                f(Value::Ref(frame.template));
                f(frame.env);
            }
        }
        HeapData::CoroutineToken(token) => f(Value::Ref(token.coroutine)),
        HeapData::Result(result) => match result {
            ResultObject::Success(value) | ResultObject::Failure(value) => f(*value),
        },
        HeapData::Type(ty) => f(Value::Ref(ty.name)),
        HeapData::InternalType(ty) => {
            f(Value::Ref(ty.public_type));
            for (&name, &method) in &ty.methods {
                f(Value::Ref(name));
                f(method);
            }
        }
        HeapData::Method(method) => f(method.function),
        HeapData::DynamicObject(object) => {
            for (&name, &value) in &object.properties {
                f(Value::Ref(name));
                f(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachable_objects_survive_collection() {
        let mut heap = Heap::new();
        let storage = heap.allocate(HeapData::ArrayStorage(ArrayStorage {
            items: vec![Value::SmallInt(1)],
        }));
        let array = heap.allocate(HeapData::Array(Array { storage }));
        let garbage = heap.allocate(HeapData::Str(Str::new("unreferenced")));

        heap.collect([Value::Ref(array)]);

        assert!(heap.is_live(array));
        assert!(heap.is_live(storage), "storage is reachable through the array");
        assert!(!heap.is_live(garbage));
        assert_eq!(heap.live_objects(), 2);
    }

    #[test]
    fn slots_are_recycled() {
        let mut heap = Heap::new();
        let dead = heap.allocate(HeapData::Float(1.5));
        heap.collect([]);
        assert!(!heap.is_live(dead));

        let reused = heap.allocate(HeapData::Float(2.5));
        assert_eq!(reused, dead, "freed slot is reused first");
    }

    #[test]
    fn cyclic_garbage_is_collected() {
        let mut heap = Heap::new();
        // Environment chain that points back to itself.
        let env = heap.allocate(HeapData::Environment(Environment::new(Value::Null, 1)));
        let HeapData::Environment(data) = heap.get_mut(env) else {
            unreachable!()
        };
        data.slots[0] = Value::Ref(env);

        heap.collect([]);
        assert!(!heap.is_live(env));
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn interned_strings_short_circuit_through_identity() {
        let mut heap = Heap::new();
        let mut canonical = Str::new("name");
        canonical.interned = true;
        let canonical = heap.allocate(HeapData::Str(canonical));
        assert!(heap.values_equal(Value::Ref(canonical), Value::Ref(canonical)));

        // A plain string with the same content still compares equal: only
        // one side is canonical, so the content path decides.
        let plain = heap.allocate(HeapData::Str(Str::new("name")));
        assert!(heap.values_equal(Value::Ref(canonical), Value::Ref(plain)));

        let mut other = Str::new("other");
        other.interned = true;
        let other = heap.allocate(HeapData::Str(other));
        assert!(!heap.values_equal(Value::Ref(canonical), Value::Ref(other)));
    }

    #[test]
    fn slices_hash_and_compare_like_their_content() {
        let mut heap = Heap::new();
        let backing = heap.allocate(HeapData::Str(Str::new("hello world")));
        let slice = heap.allocate(HeapData::StrSlice(StrSlice {
            backing,
            offset: 0,
            length: 5,
        }));
        let hello = heap.allocate(HeapData::Str(Str::new("hello")));

        assert!(heap.values_equal(Value::Ref(slice), Value::Ref(hello)));
        assert_eq!(
            heap.key_hash(Value::Ref(slice)).unwrap(),
            heap.key_hash(Value::Ref(hello)).unwrap()
        );
    }

    #[test]
    fn small_ints_stay_inline_and_large_ints_box() {
        let mut heap = Heap::new();
        assert_eq!(heap.box_int(17), Value::SmallInt(17));
        assert_eq!(heap.box_int(SMALL_INT_MIN), Value::SmallInt(SMALL_INT_MIN));
        let boxed = heap.box_int(SMALL_INT_MAX + 1);
        assert!(matches!(boxed, Value::Ref(_)));
        assert_eq!(heap.as_int(boxed), Some(SMALL_INT_MAX + 1));
    }
}
