//! Turning a compiled module into a live runtime module.
//!
//! Every member definition becomes a value in the module's member vector:
//! constants intern into the context, functions become function objects over
//! fresh templates, record schemas become symbol tuples. Imports stay
//! unresolved (undefined plus a name note) until the interpreter first
//! touches them, which keeps cross-module references symbolic until needed.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    bytecode::{BytecodeMember, CompiledModule},
    vm::{
        context::Context,
        error::{ErrorKind, RunError, RunResult},
        handles::Scope,
        heap::HeapData,
        objects::{Code, FunctionObject, FunctionTemplate, ModuleObject, Tuple},
        value::{HeapId, Value},
    },
};

pub fn load_module(ctx: &mut Context, compiled: &CompiledModule) -> RunResult<HeapId> {
    if !compiled.is_linked() {
        return Err(RunError::new(
            ErrorKind::BadArgument,
            "compiled module contains unresolved link items",
        ));
    }

    let module_name = compiled.strings.try_get(compiled.name).unwrap_or("<module>").to_owned();
    let name = ctx.intern_str(&module_name);

    // The module object exists before its members so function templates can
    // point back at it.
    let module = ctx.heap.allocate(HeapData::Module(ModuleObject {
        name,
        members: Vec::new(),
        imports: ahash::AHashMap::new(),
        exports: IndexMap::new(),
        init: None,
    }));
    let scope = Scope::new(&ctx.roots);
    let _rooted = scope.local(Value::Ref(module));

    let text = |id| compiled.strings.try_get(id).unwrap_or("");

    let mut members = Vec::with_capacity(compiled.members.len());
    let mut imports = ahash::AHashMap::new();
    for (slot, item) in compiled.members.iter().enumerate() {
        let value = match item.definition() {
            BytecodeMember::Integer(value) => ctx.heap.box_int(*value),
            BytecodeMember::Float(value) => Value::Ref(ctx.heap.allocate(HeapData::Float(*value))),
            BytecodeMember::String(id) => Value::Ref(ctx.intern_str(text(*id))),
            BytecodeMember::Symbol(id) => Value::Ref(ctx.intern_symbol(text(*id))),
            BytecodeMember::Import(id) => {
                let import_name = ctx.intern_str(text(*id));
                imports.insert(slot as u32, import_name);
                Value::Undefined
            }
            BytecodeMember::Variable(_) => Value::Null,
            BytecodeMember::Function(index) => {
                let function = &compiled.functions[*index as usize];
                let code = ctx.heap.allocate(HeapData::Code(Code {
                    bytes: Rc::from(function.code.as_slice()),
                }));
                let function_name = ctx.intern_str(text(function.name));
                let template = ctx.heap.allocate(HeapData::FunctionTemplate(FunctionTemplate {
                    name: function_name,
                    module,
                    code,
                    params: function.params,
                    locals: function.locals,
                }));
                Value::Ref(ctx.heap.allocate(HeapData::Function(FunctionObject {
                    template,
                    env: Value::Null,
                })))
            }
            BytecodeMember::RecordSchema(index) => {
                let keys: Vec<Value> = compiled.schemas[*index as usize]
                    .iter()
                    .map(|&key| Value::Ref(ctx.intern_symbol(text(key))))
                    .collect();
                Value::Ref(ctx.heap.allocate(HeapData::Tuple(Tuple { items: keys })))
            }
        };
        members.push(value);
    }

    let mut exports = IndexMap::new();
    for &(symbol_member, member) in &compiled.exports {
        let Value::Ref(symbol) = members[symbol_member as usize] else {
            return Err(RunError::new(
                ErrorKind::BadArgument,
                "export table references a non-symbol member",
            ));
        };
        exports.insert(symbol, member);
    }

    let HeapData::Module(data) = ctx.heap.get_mut(module) else {
        unreachable!()
    };
    data.members = members;
    data.imports = imports;
    data.exports = exports;
    data.init = compiled.init;

    Ok(module)
}

/// Runs the module initializer once, then forgets it.
pub fn run_module_init(ctx: &mut Context, module: HeapId) -> RunResult<()> {
    let HeapData::Module(data) = ctx.heap.get(module) else {
        return Err(RunError::new(ErrorKind::BadArgument, "expected a module"));
    };
    let Some(init) = data.init else {
        return Ok(());
    };
    let function = data.members[init as usize];

    ctx.call_function(function, &[])?;

    let HeapData::Module(data) = ctx.heap.get_mut(module) else {
        unreachable!()
    };
    data.init = None;
    Ok(())
}
