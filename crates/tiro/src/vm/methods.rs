//! Built-in object methods and the `std` native module.
//!
//! Each runtime type with methods gets an internal type object holding its
//! method table; [`install`] builds all tables plus the `std` module when a
//! context is created. Instance methods are wrapped in a `Method` object so
//! the method-load instruction knows to pass the receiver; plain entries
//! behave like static function members.

use indexmap::IndexMap;

use crate::vm::{
    context::Context,
    error::{ErrorKind, RunError, RunResult},
    heap::{Heap, HeapData},
    objects::{
        Array, ArrayStorage, Buffer, CoroutineState, CoroutineToken, DynamicObject, HashTableIterator, InternalType,
        Method, ModuleObject, NativeFunction, ResultObject, Str, StrSlice, Tuple, TypeObject,
    },
    value::{HeapId, Value, ValueType},
};

use super::objects::function::{NativeFn, NativeResult};

/// Arity marker for natives that accept any number of arguments.
pub const VARIADIC: u32 = u32::MAX;

struct MethodSpec {
    name: &'static str,
    params: u32,
    /// Instance methods receive the object as receiver.
    instance: bool,
    func: NativeFn,
}

const fn method(name: &'static str, params: u32, func: NativeFn) -> MethodSpec {
    MethodSpec {
        name,
        params,
        instance: true,
        func,
    }
}

pub fn install(ctx: &mut Context) {
    install_type(
        ctx,
        ValueType::String,
        "String",
        &[
            method("size", 0, string_size),
            method("contains", 1, string_contains),
            method("slice", 2, string_slice),
        ],
    );
    install_type(
        ctx,
        ValueType::StringSlice,
        "StringSlice",
        &[
            method("size", 0, string_size),
            method("contains", 1, string_contains),
            method("slice", 2, string_slice),
        ],
    );
    install_type(
        ctx,
        ValueType::Array,
        "Array",
        &[
            method("size", 0, array_size),
            method("push", 1, array_push),
            method("pop", 0, array_pop),
            method("clear", 0, array_clear),
        ],
    );
    install_type(ctx, ValueType::Tuple, "Tuple", &[method("size", 0, tuple_size)]);
    install_type(
        ctx,
        ValueType::HashTable,
        "Map",
        &[
            method("size", 0, table_size),
            method("contains", 1, table_contains),
            method("get", 1, table_get),
            method("remove", 1, table_remove),
            method("clear", 0, table_clear),
            method("keys", 0, table_keys),
            method("iter", 0, table_iter),
        ],
    );
    install_type(
        ctx,
        ValueType::HashTableIterator,
        "MapIterator",
        &[method("next", 0, table_iter_next)],
    );
    install_type(
        ctx,
        ValueType::Set,
        "Set",
        &[
            method("size", 0, table_size),
            method("contains", 1, table_contains),
            method("add", 1, set_add),
            method("remove", 1, table_remove),
            method("clear", 0, table_clear),
        ],
    );
    install_type(ctx, ValueType::Buffer, "Buffer", &[method("size", 0, buffer_size)]);
    install_type(ctx, ValueType::Record, "Record", &[method("keys", 0, record_keys)]);
    install_type(ctx, ValueType::Module, "Module", &[method("name", 0, module_name)]);
    install_type(
        ctx,
        ValueType::Coroutine,
        "Coroutine",
        &[
            method("name", 0, coroutine_name),
            method("state", 0, coroutine_state),
            method("result", 0, coroutine_result),
        ],
    );
    install_type(
        ctx,
        ValueType::CoroutineToken,
        "CoroutineToken",
        &[method("valid", 0, token_valid), method("resume", 0, token_resume)],
    );
    install_type(
        ctx,
        ValueType::Result,
        "Result",
        &[
            method("type", 0, result_type),
            method("value", 0, result_value),
            method("error", 0, result_error),
            method("is_success", 0, result_is_success),
            method("is_failure", 0, result_is_failure),
        ],
    );
    install_type(ctx, ValueType::Type, "Type", &[method("name", 0, type_name)]);
    install_type(ctx, ValueType::Function, "Function", &[]);
    install_type(ctx, ValueType::NativeFunction, "NativeFunction", &[]);
    install_type(ctx, ValueType::Integer, "Integer", &[]);
    install_type(ctx, ValueType::Float, "Float", &[]);
    install_type(ctx, ValueType::Boolean, "Boolean", &[]);
    install_type(ctx, ValueType::Null, "Null", &[]);
    install_type(ctx, ValueType::Symbol, "Symbol", &[]);
    install_type(ctx, ValueType::DynamicObject, "Object", &[]);

    install_std_module(ctx);
}

fn install_type(ctx: &mut Context, tag: ValueType, name: &str, methods: &[MethodSpec]) {
    let name_id = ctx.intern_str(name);
    let public_type = ctx.heap.allocate(HeapData::Type(TypeObject { name: name_id }));

    let mut table = IndexMap::new();
    for spec in methods {
        let name_id = ctx.intern_str(spec.name);
        let native = ctx.heap.allocate(HeapData::NativeFunction(NativeFunction {
            name: spec.name,
            params: spec.params,
            func: spec.func,
        }));
        let entry = if spec.instance {
            Value::Ref(ctx.heap.allocate(HeapData::Method(Method {
                function: Value::Ref(native),
            })))
        } else {
            Value::Ref(native)
        };
        table.insert(name_id, entry);
    }

    let internal = ctx.heap.allocate(HeapData::InternalType(InternalType {
        public_type,
        methods: table,
    }));
    ctx.set_type_table(tag, internal);
}

fn install_std_module(ctx: &mut Context) {
    let natives: &[(&str, u32, NativeFn)] = &[
        ("launch", VARIADIC, std_launch),
        ("yield_coroutine", 0, std_yield),
        ("coroutine_token", 0, std_coroutine_token),
        ("current_coroutine", 0, std_current_coroutine),
        ("print", VARIADIC, std_print),
        ("to_string", 1, std_to_string),
        ("type_of", 1, std_type_of),
        ("object", 0, std_object),
        ("buffer", 1, std_buffer),
    ];

    let name = ctx.intern_str("std");
    let mut members = Vec::with_capacity(natives.len());
    let mut exports = IndexMap::new();
    for (slot, (native_name, params, func)) in natives.iter().enumerate() {
        let native = ctx.heap.allocate(HeapData::NativeFunction(NativeFunction {
            name: native_name,
            params: *params,
            func: *func,
        }));
        members.push(Value::Ref(native));
        let symbol = ctx.intern_symbol(native_name);
        exports.insert(symbol, slot as u32);
    }

    let module = ctx.heap.allocate(HeapData::Module(ModuleObject {
        name,
        members,
        imports: ahash::AHashMap::new(),
        exports,
        init: None,
    }));
    ctx.register_module("std", module);
}

// --- shared helpers ---

fn expect_args(name: &str, expected: usize, args: &[Value]) -> RunResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(RunError::new(
            ErrorKind::WrongArity,
            format!("{name} expects {expected} arguments, got {}", args.len()),
        ))
    }
}

fn string_content<'a>(heap: &'a Heap, value: Value) -> RunResult<&'a str> {
    heap.as_str(value)
        .ok_or_else(|| RunError::new(ErrorKind::TypeMismatch, "expected a string"))
}

/// Renders any value for printing and formatting.
pub fn value_to_string(heap: &Heap, value: Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Undefined => "undefined".to_owned(),
        Value::Bool(true) => "true".to_owned(),
        Value::Bool(false) => "false".to_owned(),
        Value::SmallInt(int) => int.to_string(),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Integer(int) => int.to_string(),
            HeapData::Float(float) => {
                let mut buffer = ryu::Buffer::new();
                buffer.format(*float).to_owned()
            }
            HeapData::Str(_) | HeapData::StrSlice(_) => heap.as_str(value).unwrap_or("").to_owned(),
            HeapData::Symbol(symbol) => {
                format!("#{}", heap.as_str(Value::Ref(symbol.name)).unwrap_or(""))
            }
            HeapData::Tuple(tuple) => {
                let items: Vec<String> = tuple.items.iter().map(|&item| value_to_string(heap, item)).collect();
                format!("({})", items.join(", "))
            }
            HeapData::Array(array) => {
                let HeapData::ArrayStorage(storage) = heap.get(array.storage) else {
                    return "[]".to_owned();
                };
                let items: Vec<String> = storage.items.iter().map(|&item| value_to_string(heap, item)).collect();
                format!("[{}]", items.join(", "))
            }
            HeapData::Record(record) => {
                let fields: Vec<String> = record
                    .keys
                    .iter()
                    .zip(&record.values)
                    .map(|(&key, &field)| {
                        format!(
                            "{}: {}",
                            heap.as_str(Value::Ref(key)).unwrap_or(""),
                            value_to_string(heap, field)
                        )
                    })
                    .collect();
                format!("({})", fields.join(", "))
            }
            HeapData::HashTable(_) => "<map>".to_owned(),
            HeapData::Set(_) => "<set>".to_owned(),
            HeapData::Buffer(buffer) => format!("<buffer size={}>", buffer.bytes.len()),
            HeapData::Function(function) => {
                let name = match heap.get(function.template) {
                    HeapData::FunctionTemplate(template) => {
                        heap.as_str(Value::Ref(template.name)).unwrap_or("").to_owned()
                    }
                    _ => String::new(),
                };
                format!("<function {name}>")
            }
            HeapData::NativeFunction(native) => format!("<native {}>", native.name),
            HeapData::BoundMethod(_) => "<bound method>".to_owned(),
            HeapData::Coroutine(coroutine) => {
                format!("<coroutine {}>", heap.as_str(Value::Ref(coroutine.name)).unwrap_or(""))
            }
            HeapData::CoroutineToken(token) => {
                format!("<token valid={}>", token.valid)
            }
            HeapData::Module(module) => {
                format!("<module {}>", heap.as_str(Value::Ref(module.name)).unwrap_or(""))
            }
            HeapData::Result(ResultObject::Success(inner)) => {
                format!("success({})", value_to_string(heap, *inner))
            }
            HeapData::Result(ResultObject::Failure(inner)) => {
                format!("failure({})", value_to_string(heap, *inner))
            }
            HeapData::Type(ty) => format!("<type {}>", heap.as_str(Value::Ref(ty.name)).unwrap_or("")),
            other => format!("<{}>", other.value_type()),
        },
    }
}

// --- string methods ---

fn string_size(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("size", 0, args)?;
    let length = string_content(&ctx.heap, this)?.len() as i64;
    Ok(NativeResult::Value(ctx.heap.box_int(length)))
}

fn string_contains(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("contains", 1, args)?;
    let haystack = string_content(&ctx.heap, this)?;
    let needle = string_content(&ctx.heap, args[0])?;
    let result = haystack.contains(needle);
    Ok(NativeResult::Value(Value::Bool(result)))
}

fn string_slice(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("slice", 2, args)?;
    let offset = ctx
        .heap
        .as_int(args[0])
        .ok_or_else(|| RunError::new(ErrorKind::BadArgument, "slice offset must be an integer"))?;
    let length = ctx
        .heap
        .as_int(args[1])
        .ok_or_else(|| RunError::new(ErrorKind::BadArgument, "slice length must be an integer"))?;

    // Resolve to the backing string so slices never chain.
    let (backing, base) = match this {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(_) => (id, 0u32),
            HeapData::StrSlice(slice) => (slice.backing, slice.offset),
            _ => return Err(RunError::new(ErrorKind::TypeMismatch, "expected a string")),
        },
        _ => return Err(RunError::new(ErrorKind::TypeMismatch, "expected a string")),
    };
    let content_len = string_content(&ctx.heap, this)?.len() as i64;
    if offset < 0 || length < 0 || offset + length > content_len {
        return Err(RunError::new(
            ErrorKind::OutOfBounds,
            format!("slice [{offset}, {length}) is out of bounds for a string of size {content_len}"),
        ));
    }
    let slice = ctx.heap.allocate(HeapData::StrSlice(StrSlice {
        backing,
        offset: base + offset as u32,
        length: length as u32,
    }));
    Ok(NativeResult::Value(Value::Ref(slice)))
}

// --- array methods ---

fn array_storage(heap: &Heap, this: Value) -> RunResult<HeapId> {
    let id = this
        .as_ref_id()
        .ok_or_else(|| RunError::new(ErrorKind::TypeMismatch, "expected an array"))?;
    match heap.get(id) {
        HeapData::Array(array) => Ok(array.storage),
        _ => Err(RunError::new(ErrorKind::TypeMismatch, "expected an array")),
    }
}

fn array_size(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("size", 0, args)?;
    let storage = array_storage(&ctx.heap, this)?;
    let HeapData::ArrayStorage(storage) = ctx.heap.get(storage) else {
        unreachable!()
    };
    let length = storage.items.len() as i64;
    Ok(NativeResult::Value(ctx.heap.box_int(length)))
}

fn array_push(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("push", 1, args)?;
    let storage = array_storage(&ctx.heap, this)?;
    let HeapData::ArrayStorage(storage) = ctx.heap.get_mut(storage) else {
        unreachable!()
    };
    storage.items.push(args[0]);
    Ok(NativeResult::Value(Value::Null))
}

fn array_pop(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("pop", 0, args)?;
    let storage = array_storage(&ctx.heap, this)?;
    let HeapData::ArrayStorage(storage) = ctx.heap.get_mut(storage) else {
        unreachable!()
    };
    let value = storage
        .items
        .pop()
        .ok_or_else(|| RunError::new(ErrorKind::OutOfBounds, "pop from an empty array"))?;
    Ok(NativeResult::Value(value))
}

fn array_clear(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("clear", 0, args)?;
    let storage = array_storage(&ctx.heap, this)?;
    let HeapData::ArrayStorage(storage) = ctx.heap.get_mut(storage) else {
        unreachable!()
    };
    storage.items.clear();
    Ok(NativeResult::Value(Value::Null))
}

fn tuple_size(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("size", 0, args)?;
    let Some(id) = this.as_ref_id() else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a tuple"));
    };
    let HeapData::Tuple(tuple) = ctx.heap.get(id) else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a tuple"));
    };
    let length = tuple.items.len() as i64;
    Ok(NativeResult::Value(ctx.heap.box_int(length)))
}

// --- hash table and set methods ---

fn hash_storage(heap: &Heap, this: Value) -> RunResult<HeapId> {
    let id = this
        .as_ref_id()
        .ok_or_else(|| RunError::new(ErrorKind::TypeMismatch, "expected a map or set"))?;
    match heap.get(id) {
        HeapData::HashTable(table) => Ok(table.storage),
        HeapData::Set(set) => Ok(set.storage),
        _ => Err(RunError::new(ErrorKind::TypeMismatch, "expected a map or set")),
    }
}

/// Finds the entry slot of `key`, if present.
pub fn table_find(heap: &Heap, storage: HeapId, key: Value) -> RunResult<Option<u32>> {
    let hash = heap.key_hash(key)?;
    let HeapData::HashTableStorage(data) = heap.get(storage) else {
        unreachable!("hash storage");
    };
    for &slot in data.candidates(hash) {
        if let Some((entry_key, _)) = data.entries[slot as usize]
            && heap.values_equal(entry_key, key)
        {
            return Ok(Some(slot));
        }
    }
    Ok(None)
}

/// Inserts or replaces `key` in a table or set storage.
pub fn table_insert(heap: &mut Heap, storage: HeapId, key: Value, value: Value) -> RunResult<()> {
    let existing = table_find(heap, storage, key)?;
    let hash = heap.key_hash(key)?;
    let HeapData::HashTableStorage(data) = heap.get_mut(storage) else {
        unreachable!("hash storage");
    };
    match existing {
        Some(slot) => data.replace(slot, value),
        None => data.insert_new(hash, key, value),
    }
    Ok(())
}

fn table_size(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("size", 0, args)?;
    let storage = hash_storage(&ctx.heap, this)?;
    let HeapData::HashTableStorage(data) = ctx.heap.get(storage) else {
        unreachable!()
    };
    let length = data.len() as i64;
    Ok(NativeResult::Value(ctx.heap.box_int(length)))
}

fn table_contains(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("contains", 1, args)?;
    let storage = hash_storage(&ctx.heap, this)?;
    let found = table_find(&ctx.heap, storage, args[0])?.is_some();
    Ok(NativeResult::Value(Value::Bool(found)))
}

fn table_get(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("get", 1, args)?;
    let storage = hash_storage(&ctx.heap, this)?;
    let slot = table_find(&ctx.heap, storage, args[0])?;
    let HeapData::HashTableStorage(data) = ctx.heap.get(storage) else {
        unreachable!()
    };
    let value = slot
        .and_then(|slot| data.entries[slot as usize])
        .map_or(Value::Null, |(_, value)| value);
    Ok(NativeResult::Value(value))
}

fn table_remove(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("remove", 1, args)?;
    let storage = hash_storage(&ctx.heap, this)?;
    let slot = table_find(&ctx.heap, storage, args[0])?;
    let removed = if let Some(slot) = slot {
        let hash = ctx.heap.key_hash(args[0])?;
        let HeapData::HashTableStorage(data) = ctx.heap.get_mut(storage) else {
            unreachable!()
        };
        data.remove(hash, slot).is_some()
    } else {
        false
    };
    Ok(NativeResult::Value(Value::Bool(removed)))
}

fn table_clear(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("clear", 0, args)?;
    let storage = hash_storage(&ctx.heap, this)?;
    let HeapData::HashTableStorage(data) = ctx.heap.get_mut(storage) else {
        unreachable!()
    };
    data.clear();
    Ok(NativeResult::Value(Value::Null))
}

fn table_keys(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("keys", 0, args)?;
    let storage = hash_storage(&ctx.heap, this)?;
    let HeapData::HashTableStorage(data) = ctx.heap.get(storage) else {
        unreachable!()
    };
    let keys: Vec<Value> = data.iter().map(|(key, _)| key).collect();
    let storage = ctx.heap.allocate(HeapData::ArrayStorage(ArrayStorage { items: keys }));
    let array = ctx.heap.allocate(HeapData::Array(Array { storage }));
    Ok(NativeResult::Value(Value::Ref(array)))
}

fn table_iter(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("iter", 0, args)?;
    let table = this
        .as_ref_id()
        .ok_or_else(|| RunError::new(ErrorKind::TypeMismatch, "expected a map"))?;
    let iterator = ctx
        .heap
        .allocate(HeapData::HashTableIterator(HashTableIterator { table, position: 0 }));
    Ok(NativeResult::Value(Value::Ref(iterator)))
}

fn table_iter_next(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("next", 0, args)?;
    let Some(id) = this.as_ref_id() else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a map iterator"));
    };
    let HeapData::HashTableIterator(iterator) = ctx.heap.get(id) else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a map iterator"));
    };
    let table = iterator.table;
    let mut position = iterator.position;

    let storage = hash_storage(&ctx.heap, Value::Ref(table))?;
    let HeapData::HashTableStorage(data) = ctx.heap.get(storage) else {
        unreachable!()
    };
    let mut next = None;
    while (position as usize) < data.entries.len() {
        let slot = data.entries[position as usize];
        position += 1;
        if let Some((key, value)) = slot {
            next = Some((key, value));
            break;
        }
    }

    let HeapData::HashTableIterator(iterator) = ctx.heap.get_mut(id) else {
        unreachable!()
    };
    iterator.position = position;

    match next {
        Some((key, value)) => {
            let pair = ctx.heap.allocate(HeapData::Tuple(Tuple {
                items: vec![key, value],
            }));
            Ok(NativeResult::Value(Value::Ref(pair)))
        }
        None => Ok(NativeResult::Value(Value::Null)),
    }
}

fn set_add(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("add", 1, args)?;
    let storage = hash_storage(&ctx.heap, this)?;
    let added = table_find(&ctx.heap, storage, args[0])?.is_none();
    table_insert(&mut ctx.heap, storage, args[0], Value::Null)?;
    Ok(NativeResult::Value(Value::Bool(added)))
}

// --- miscellaneous type methods ---

fn buffer_size(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("size", 0, args)?;
    let Some(id) = this.as_ref_id() else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a buffer"));
    };
    let HeapData::Buffer(buffer) = ctx.heap.get(id) else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a buffer"));
    };
    let length = buffer.bytes.len() as i64;
    Ok(NativeResult::Value(ctx.heap.box_int(length)))
}

fn record_keys(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("keys", 0, args)?;
    let Some(id) = this.as_ref_id() else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a record"));
    };
    let HeapData::Record(record) = ctx.heap.get(id) else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a record"));
    };
    let names: Vec<String> = record
        .keys
        .iter()
        .map(|&key| ctx.heap.as_str(Value::Ref(key)).unwrap_or("").to_owned())
        .collect();
    let keys: Vec<Value> = names.iter().map(|name| Value::Ref(ctx.intern_symbol(name))).collect();
    let storage = ctx.heap.allocate(HeapData::ArrayStorage(ArrayStorage { items: keys }));
    let array = ctx.heap.allocate(HeapData::Array(Array { storage }));
    Ok(NativeResult::Value(Value::Ref(array)))
}

fn module_name(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("name", 0, args)?;
    let Some(id) = this.as_ref_id() else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a module"));
    };
    let HeapData::Module(module) = ctx.heap.get(id) else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a module"));
    };
    Ok(NativeResult::Value(Value::Ref(module.name)))
}

fn coroutine_data<'a>(heap: &'a Heap, this: Value) -> RunResult<&'a crate::vm::objects::Coroutine> {
    let id = this
        .as_ref_id()
        .ok_or_else(|| RunError::new(ErrorKind::TypeMismatch, "expected a coroutine"))?;
    match heap.get(id) {
        HeapData::Coroutine(coroutine) => Ok(coroutine),
        _ => Err(RunError::new(ErrorKind::TypeMismatch, "expected a coroutine")),
    }
}

fn coroutine_name(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("name", 0, args)?;
    let name = coroutine_data(&ctx.heap, this)?.name;
    Ok(NativeResult::Value(Value::Ref(name)))
}

fn coroutine_state(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("state", 0, args)?;
    let state = coroutine_data(&ctx.heap, this)?.state;
    let symbol = match state {
        CoroutineState::Ready => "ready",
        CoroutineState::Running => "running",
        CoroutineState::Waiting => "waiting",
        CoroutineState::Done => "done",
    };
    let symbol = ctx.intern_symbol(symbol);
    Ok(NativeResult::Value(Value::Ref(symbol)))
}

fn coroutine_result(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("result", 0, args)?;
    let result = coroutine_data(&ctx.heap, this)?.result;
    Ok(NativeResult::Value(result.unwrap_or(Value::Null)))
}

fn token_valid(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("valid", 0, args)?;
    let Some(id) = this.as_ref_id() else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a coroutine token"));
    };
    let HeapData::CoroutineToken(token) = ctx.heap.get(id) else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a coroutine token"));
    };
    Ok(NativeResult::Value(Value::Bool(token.valid)))
}

fn token_resume(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("resume", 0, args)?;
    let resumed = ctx.resume_token(this)?;
    Ok(NativeResult::Value(Value::Bool(resumed)))
}

fn result_data<'a>(heap: &'a Heap, this: Value) -> RunResult<&'a ResultObject> {
    let id = this
        .as_ref_id()
        .ok_or_else(|| RunError::new(ErrorKind::TypeMismatch, "expected a result"))?;
    match heap.get(id) {
        HeapData::Result(result) => Ok(result),
        _ => Err(RunError::new(ErrorKind::TypeMismatch, "expected a result")),
    }
}

fn result_type(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("type", 0, args)?;
    let symbol = match result_data(&ctx.heap, this)? {
        ResultObject::Success(_) => "success",
        ResultObject::Failure(_) => "error",
    };
    let symbol = ctx.intern_symbol(symbol);
    Ok(NativeResult::Value(Value::Ref(symbol)))
}

fn result_value(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("value", 0, args)?;
    match result_data(&ctx.heap, this)? {
        ResultObject::Success(value) => Ok(NativeResult::Value(*value)),
        ResultObject::Failure(_) => Err(RunError::new(
            ErrorKind::WrongResultVariant,
            "value() called on a failure result",
        )),
    }
}

fn result_error(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("error", 0, args)?;
    match result_data(&ctx.heap, this)? {
        ResultObject::Failure(error) => Ok(NativeResult::Value(*error)),
        ResultObject::Success(_) => Err(RunError::new(
            ErrorKind::WrongResultVariant,
            "error() called on a success result",
        )),
    }
}

fn result_is_success(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("is_success", 0, args)?;
    let flag = matches!(result_data(&ctx.heap, this)?, ResultObject::Success(_));
    Ok(NativeResult::Value(Value::Bool(flag)))
}

fn result_is_failure(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("is_failure", 0, args)?;
    let flag = matches!(result_data(&ctx.heap, this)?, ResultObject::Failure(_));
    Ok(NativeResult::Value(Value::Bool(flag)))
}

fn type_name(ctx: &mut Context, this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("name", 0, args)?;
    let Some(id) = this.as_ref_id() else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a type"));
    };
    let HeapData::Type(ty) = ctx.heap.get(id) else {
        return Err(RunError::new(ErrorKind::TypeMismatch, "expected a type"));
    };
    Ok(NativeResult::Value(Value::Ref(ty.name)))
}

// --- std natives ---

fn std_launch(ctx: &mut Context, _this: Value, args: &[Value]) -> RunResult<NativeResult> {
    let [function, rest @ ..] = args else {
        return Err(RunError::new(ErrorKind::WrongArity, "launch expects a function"));
    };
    let coroutine = ctx.make_coroutine("coroutine", *function, rest);
    ctx.scheduler.schedule(coroutine);
    Ok(NativeResult::Value(Value::Ref(coroutine)))
}

fn std_yield(_ctx: &mut Context, _this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("yield_coroutine", 0, args)?;
    Ok(NativeResult::Yield)
}

fn std_coroutine_token(ctx: &mut Context, _this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("coroutine_token", 0, args)?;
    let current = ctx
        .current_coroutine()
        .ok_or_else(|| RunError::new(ErrorKind::UnsupportedOperation, "no coroutine is running"))?;
    let token = ctx.heap.allocate(HeapData::CoroutineToken(CoroutineToken {
        coroutine: current,
        valid: true,
    }));
    let HeapData::Coroutine(coroutine) = ctx.heap.get_mut(current) else {
        unreachable!()
    };
    coroutine.token = Some(token);
    Ok(NativeResult::Value(Value::Ref(token)))
}

fn std_current_coroutine(ctx: &mut Context, _this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("current_coroutine", 0, args)?;
    let current = ctx
        .current_coroutine()
        .ok_or_else(|| RunError::new(ErrorKind::UnsupportedOperation, "no coroutine is running"))?;
    Ok(NativeResult::Value(Value::Ref(current)))
}

fn std_print(ctx: &mut Context, _this: Value, args: &[Value]) -> RunResult<NativeResult> {
    let rendered: Vec<String> = args.iter().map(|&arg| value_to_string(&ctx.heap, arg)).collect();
    println!("{}", rendered.join(" "));
    Ok(NativeResult::Value(Value::Null))
}

fn std_to_string(ctx: &mut Context, _this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("to_string", 1, args)?;
    let text = value_to_string(&ctx.heap, args[0]);
    let string = ctx.heap.allocate(HeapData::Str(Str::new(&text)));
    Ok(NativeResult::Value(Value::Ref(string)))
}

fn std_type_of(ctx: &mut Context, _this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("type_of", 1, args)?;
    let tag = ctx.heap.value_type(args[0]);
    let ty = ctx
        .public_type(tag)
        .ok_or_else(|| RunError::new(ErrorKind::UnsupportedOperation, format!("type {tag} has no type object")))?;
    Ok(NativeResult::Value(Value::Ref(ty)))
}

fn std_object(ctx: &mut Context, _this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("object", 0, args)?;
    let object = ctx.heap.allocate(HeapData::DynamicObject(DynamicObject::default()));
    Ok(NativeResult::Value(Value::Ref(object)))
}

fn std_buffer(ctx: &mut Context, _this: Value, args: &[Value]) -> RunResult<NativeResult> {
    expect_args("buffer", 1, args)?;
    let size = ctx
        .heap
        .as_int(args[0])
        .filter(|&size| size >= 0)
        .ok_or_else(|| RunError::new(ErrorKind::BadArgument, "buffer size must be a non-negative integer"))?;
    let buffer = ctx.heap.allocate(HeapData::Buffer(Buffer {
        bytes: vec![0; size as usize],
    }));
    Ok(NativeResult::Value(Value::Ref(buffer)))
}
