//! The bytecode interpreter.
//!
//! Dispatch reads one opcode, executes its handler and loops. Collection can
//! only happen at the top of the loop, never mid-instruction, so handlers
//! may freely juggle unrooted values. The program counter is written back to
//! the active frame right after operand decoding; control-flow handlers
//! overwrite it, and frame pushes leave the caller's counter pointing at the
//! next instruction.
//!
//! A runtime error unwinds out of [`run`]; the context then marks the
//! coroutine done with a failure result. Errors never cross the scheduler
//! boundary.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    bytecode::op::Opcode,
    vm::{
        context::Context,
        error::{ErrorKind, RunError, RunResult},
        heap::HeapData,
        methods::{VARIADIC, value_to_string},
        objects::{
            Array, ArrayStorage, BoundMethod, CoroutineStack, Environment, FRAME_POP_ONE_MORE, FunctionObject,
            HashTable, HashTableStorage, Record, Set, Str, StrBuilder, Tuple,
            function::NativeResult,
        },
        value::{HeapId, Value, ValueType},
    },
};

/// How one scheduling step of a coroutine ended.
#[derive(Debug)]
pub enum CoroutineStep {
    Done(Value),
    Yield,
}

/// Runs `coroutine` until it finishes, yields or fails.
pub fn run(ctx: &mut Context, coroutine: HeapId) -> RunResult<CoroutineStep> {
    let stack = match ensure_stack(ctx, coroutine)? {
        StackState::Running(stack) => stack,
        StackState::Finished(value) => return Ok(CoroutineStep::Done(value)),
        StackState::Parked(_) => return Ok(CoroutineStep::Yield),
    };
    dispatch(ctx, stack)
}

enum StackState {
    Running(HeapId),
    Finished(Value),
    Parked(HeapId),
}

/// Creates the stack and the first frame on a coroutine's first run.
fn ensure_stack(ctx: &mut Context, coroutine: HeapId) -> RunResult<StackState> {
    let HeapData::Coroutine(data) = ctx.heap.get(coroutine) else {
        panic!("not a coroutine");
    };
    if let Some(stack) = data.stack {
        return Ok(StackState::Running(stack));
    }

    let function = data.function;
    let args = data.args.clone();
    let stack = ctx.heap.allocate(HeapData::CoroutineStack(CoroutineStack::new()));
    let HeapData::Coroutine(data) = ctx.heap.get_mut(coroutine) else {
        unreachable!()
    };
    data.stack = Some(stack);
    data.args.clear();

    {
        let HeapData::CoroutineStack(values) = ctx.heap.get_mut(stack) else {
            unreachable!()
        };
        values.push(function);
        for arg in args.iter().copied() {
            values.push(arg);
        }
    }

    match call_value(ctx, stack, args.len() as u32, CallKind::Plain)? {
        CallAction::FramePushed => Ok(StackState::Running(stack)),
        CallAction::ValueReady => {
            // A native entry function completed synchronously.
            let value = with_stack(ctx, stack, CoroutineStack::pop);
            Ok(StackState::Finished(value))
        }
        CallAction::Yielded => Ok(StackState::Parked(stack)),
    }
}

fn with_stack<R>(ctx: &mut Context, stack: HeapId, f: impl FnOnce(&mut CoroutineStack) -> R) -> R {
    let HeapData::CoroutineStack(data) = ctx.heap.get_mut(stack) else {
        panic!("not a coroutine stack");
    };
    f(data)
}

/// Copied fields of the active frame's template.
#[derive(Clone)]
struct ActiveFrame {
    module: HeapId,
    code: Rc<[u8]>,
    base: usize,
    locals_base: usize,
    env: Value,
    pc: usize,
}

fn active_frame(ctx: &Context, stack: HeapId) -> ActiveFrame {
    let HeapData::CoroutineStack(data) = ctx.heap.get(stack) else {
        panic!("not a coroutine stack");
    };
    let frame = data.top_frame().expect("dispatch requires an active frame");
    let HeapData::FunctionTemplate(template) = ctx.heap.get(frame.template) else {
        panic!("frame template is not a function template");
    };
    let HeapData::Code(code) = ctx.heap.get(template.code) else {
        panic!("template code is not a code object");
    };
    ActiveFrame {
        module: template.module,
        code: Rc::clone(&code.bytes),
        base: frame.base,
        locals_base: frame.locals_base(),
        env: frame.env,
        pc: frame.pc,
    }
}

fn set_pc(ctx: &mut Context, stack: HeapId, pc: usize) {
    with_stack(ctx, stack, |data| {
        data.top_frame_mut().expect("active frame").pc = pc;
    });
}

fn read_u32(code: &[u8], pc: &mut usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&code[*pc..*pc + 4]);
    *pc += 4;
    u32::from_le_bytes(bytes)
}

fn read_u64(code: &[u8], pc: &mut usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&code[*pc..*pc + 8]);
    *pc += 8;
    u64::from_le_bytes(bytes)
}

fn type_error(message: impl Into<String>) -> RunError {
    RunError::new(ErrorKind::TypeMismatch, message)
}

/// Truthiness: null and false are falsy, the undefined poison is an error,
/// everything else is truthy.
fn truthy(value: Value) -> RunResult<bool> {
    match value {
        Value::Null | Value::Bool(false) => Ok(false),
        Value::Undefined => Err(RunError::new(
            ErrorKind::UndefinedValue,
            "use of a variable before its definition",
        )),
        _ => Ok(true),
    }
}

fn dispatch(ctx: &mut Context, stack: HeapId) -> RunResult<CoroutineStep> {
    loop {
        // The only collection point: no instruction is mid-execution.
        ctx.maybe_collect();

        let frame = active_frame(ctx, stack);
        let mut pc = frame.pc;
        let byte = frame.code[pc];
        pc += 1;
        let op = Opcode::from_repr(byte)
            .unwrap_or_else(|| panic!("corrupt bytecode: invalid opcode {byte:#04x} at offset {}", pc - 1));

        match op {
            Opcode::LoadNull => {
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| s.push(Value::Null));
            }
            Opcode::LoadFalse => {
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| s.push(Value::Bool(false)));
            }
            Opcode::LoadTrue => {
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| s.push(Value::Bool(true)));
            }
            Opcode::LoadInt => {
                let value = read_u64(&frame.code, &mut pc) as i64;
                set_pc(ctx, stack, pc);
                let value = ctx.heap.box_int(value);
                with_stack(ctx, stack, |s| s.push(value));
            }
            Opcode::LoadFloat => {
                let value = f64::from_bits(read_u64(&frame.code, &mut pc));
                set_pc(ctx, stack, pc);
                let value = Value::Ref(ctx.heap.allocate(HeapData::Float(value)));
                with_stack(ctx, stack, |s| s.push(value));
            }
            Opcode::LoadParam => {
                let index = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| {
                    let value = s.values[frame.base + index];
                    s.push(value);
                });
            }
            Opcode::StoreParam => {
                let index = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| {
                    let value = s.pop();
                    s.values[frame.base + index] = value;
                });
            }
            Opcode::LoadLocal | Opcode::Push => {
                let index = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| {
                    let value = s.values[frame.locals_base + index];
                    s.push(value);
                });
            }
            Opcode::StoreLocal | Opcode::PopTo => {
                let index = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| {
                    let value = s.pop();
                    s.values[frame.locals_base + index] = value;
                });
            }
            Opcode::LoadModule => {
                let member = read_u32(&frame.code, &mut pc);
                set_pc(ctx, stack, pc);
                let value = resolve_module_member(ctx, frame.module, member)?;
                with_stack(ctx, stack, |s| s.push(value));
            }
            Opcode::StoreModule => {
                let member = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                let value = with_stack(ctx, stack, CoroutineStack::pop);
                let HeapData::Module(module) = ctx.heap.get_mut(frame.module) else {
                    panic!("frame module is not a module");
                };
                module.members[member] = value;
            }
            Opcode::LoadMember => {
                let member = read_u32(&frame.code, &mut pc);
                set_pc(ctx, stack, pc);
                let object = with_stack(ctx, stack, CoroutineStack::pop);
                let symbol = member_symbol(ctx, frame.module, member);
                let value = load_member(ctx, object, symbol)?;
                with_stack(ctx, stack, |s| s.push(value));
            }
            Opcode::StoreMember => {
                let member = read_u32(&frame.code, &mut pc);
                set_pc(ctx, stack, pc);
                let (object, value) = with_stack(ctx, stack, |s| {
                    let value = s.pop();
                    let object = s.pop();
                    (object, value)
                });
                let symbol = member_symbol(ctx, frame.module, member);
                store_member(ctx, object, symbol, value)?;
            }
            Opcode::LoadTupleMember => {
                let index = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                let object = with_stack(ctx, stack, CoroutineStack::pop);
                let value = tuple_member(ctx, object, index)?;
                with_stack(ctx, stack, |s| s.push(value));
            }
            Opcode::StoreTupleMember => {
                let index = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                let (object, value) = with_stack(ctx, stack, |s| {
                    let value = s.pop();
                    let object = s.pop();
                    (object, value)
                });
                store_tuple_member(ctx, object, index, value)?;
            }
            Opcode::LoadIndex => {
                set_pc(ctx, stack, pc);
                let (object, index) = with_stack(ctx, stack, |s| {
                    let index = s.pop();
                    let object = s.pop();
                    (object, index)
                });
                let value = load_index(ctx, object, index)?;
                with_stack(ctx, stack, |s| s.push(value));
            }
            Opcode::StoreIndex => {
                set_pc(ctx, stack, pc);
                let (object, index, value) = with_stack(ctx, stack, |s| {
                    let value = s.pop();
                    let index = s.pop();
                    let object = s.pop();
                    (object, index, value)
                });
                store_index(ctx, object, index, value)?;
            }
            Opcode::LoadClosure => {
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| s.push(frame.env));
            }
            Opcode::LoadEnv => {
                let levels = read_u32(&frame.code, &mut pc);
                let index = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                let env = with_stack(ctx, stack, CoroutineStack::pop);
                let env = env_at(ctx, env, levels)?;
                let HeapData::Environment(data) = ctx.heap.get(env) else {
                    unreachable!()
                };
                let value = data.slots[index];
                with_stack(ctx, stack, |s| s.push(value));
            }
            Opcode::StoreEnv => {
                let levels = read_u32(&frame.code, &mut pc);
                let index = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                let (env, value) = with_stack(ctx, stack, |s| {
                    let value = s.pop();
                    let env = s.pop();
                    (env, value)
                });
                let env = env_at(ctx, env, levels)?;
                let HeapData::Environment(data) = ctx.heap.get_mut(env) else {
                    unreachable!()
                };
                data.slots[index] = value;
            }
            Opcode::LoadMethod => {
                let member = read_u32(&frame.code, &mut pc);
                set_pc(ctx, stack, pc);
                let object = with_stack(ctx, stack, CoroutineStack::pop);
                let symbol = member_symbol(ctx, frame.module, member);
                let (function, instance) = load_method(ctx, object, symbol)?;
                with_stack(ctx, stack, |s| {
                    s.push(function);
                    s.push(instance);
                });
            }
            Opcode::Copy => {
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| {
                    let top = s.peek(0);
                    s.push(top);
                });
            }
            Opcode::Swap => {
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| {
                    let len = s.values.len();
                    s.values.swap(len - 1, len - 2);
                });
            }
            Opcode::Pop => {
                set_pc(ctx, stack, pc);
                with_stack(ctx, stack, |s| {
                    s.pop();
                });
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Pow
            | Opcode::LSh
            | Opcode::RSh
            | Opcode::BAnd
            | Opcode::BOr
            | Opcode::BXor
            | Opcode::Gt
            | Opcode::Gte
            | Opcode::Lt
            | Opcode::Lte
            | Opcode::Eq
            | Opcode::NEq => {
                set_pc(ctx, stack, pc);
                let (left, right) = with_stack(ctx, stack, |s| {
                    let right = s.pop();
                    let left = s.pop();
                    (left, right)
                });
                let result = binary_op(ctx, op, left, right)?;
                with_stack(ctx, stack, |s| s.push(result));
            }
            Opcode::UNeg | Opcode::UPos | Opcode::LNot | Opcode::BNot => {
                set_pc(ctx, stack, pc);
                let operand = with_stack(ctx, stack, CoroutineStack::pop);
                let result = unary_op(ctx, op, operand)?;
                with_stack(ctx, stack, |s| s.push(result));
            }
            Opcode::Array => {
                let count = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                let items = pop_values(ctx, stack, count);
                let storage = ctx.heap.allocate(HeapData::ArrayStorage(ArrayStorage { items }));
                let array = ctx.heap.allocate(HeapData::Array(Array { storage }));
                with_stack(ctx, stack, |s| s.push(Value::Ref(array)));
            }
            Opcode::Tuple => {
                let count = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                let items = pop_values(ctx, stack, count);
                let tuple = ctx.heap.allocate(HeapData::Tuple(Tuple { items }));
                with_stack(ctx, stack, |s| s.push(Value::Ref(tuple)));
            }
            Opcode::Set => {
                let count = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                let items = pop_values(ctx, stack, count);
                let storage = ctx.heap.allocate(HeapData::HashTableStorage(HashTableStorage::new()));
                for item in items {
                    crate::vm::methods::table_insert(&mut ctx.heap, storage, item, Value::Null)?;
                }
                let set = ctx.heap.allocate(HeapData::Set(Set { storage }));
                with_stack(ctx, stack, |s| s.push(Value::Ref(set)));
            }
            Opcode::Map => {
                let pairs = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, pc);
                let flat = pop_values(ctx, stack, pairs * 2);
                let storage = ctx.heap.allocate(HeapData::HashTableStorage(HashTableStorage::new()));
                for pair in flat.chunks_exact(2) {
                    crate::vm::methods::table_insert(&mut ctx.heap, storage, pair[0], pair[1])?;
                }
                let table = ctx.heap.allocate(HeapData::HashTable(HashTable { storage }));
                with_stack(ctx, stack, |s| s.push(Value::Ref(table)));
            }
            Opcode::Env => {
                let size = read_u32(&frame.code, &mut pc);
                set_pc(ctx, stack, pc);
                let parent = with_stack(ctx, stack, CoroutineStack::pop);
                if !matches!(parent, Value::Null) && !matches!(ctx.heap.value_type(parent), ValueType::Environment) {
                    return Err(type_error("environment parent must be an environment or null"));
                }
                let env = ctx.heap.allocate(HeapData::Environment(Environment::new(parent, size)));
                with_stack(ctx, stack, |s| s.push(Value::Ref(env)));
            }
            Opcode::Closure => {
                set_pc(ctx, stack, pc);
                let (template, env) = with_stack(ctx, stack, |s| {
                    let env = s.pop();
                    let template = s.pop();
                    (template, env)
                });
                let Some(id) = template.as_ref_id() else {
                    return Err(type_error("closure template must be a function"));
                };
                let HeapData::Function(function) = ctx.heap.get(id) else {
                    return Err(type_error("closure template must be a function"));
                };
                let template = function.template;
                let closure = ctx.heap.allocate(HeapData::Function(FunctionObject { template, env }));
                with_stack(ctx, stack, |s| s.push(Value::Ref(closure)));
            }
            Opcode::Record => {
                let member = read_u32(&frame.code, &mut pc);
                set_pc(ctx, stack, pc);
                let schema = resolve_module_member(ctx, frame.module, member)?;
                let Some(schema_id) = schema.as_ref_id() else {
                    return Err(type_error("record schema member must be a tuple of symbols"));
                };
                let HeapData::Tuple(schema) = ctx.heap.get(schema_id) else {
                    return Err(type_error("record schema member must be a tuple of symbols"));
                };
                let mut keys = Vec::with_capacity(schema.items.len());
                for &item in &schema.items {
                    let Some(symbol) = item.as_ref_id() else {
                        return Err(type_error("record schema entries must be symbols"));
                    };
                    let HeapData::Symbol(symbol) = ctx.heap.get(symbol) else {
                        return Err(type_error("record schema entries must be symbols"));
                    };
                    keys.push(symbol.name);
                }
                let values = pop_values(ctx, stack, keys.len());
                let record = ctx.heap.allocate(HeapData::Record(Record { keys, values }));
                with_stack(ctx, stack, |s| s.push(Value::Ref(record)));
            }
            Opcode::Formatter => {
                set_pc(ctx, stack, pc);
                let builder = ctx.heap.allocate(HeapData::StrBuilder(StrBuilder::new()));
                with_stack(ctx, stack, |s| s.push(Value::Ref(builder)));
            }
            Opcode::AppendFormat => {
                set_pc(ctx, stack, pc);
                let (builder, value) = with_stack(ctx, stack, |s| {
                    let value = s.pop();
                    let builder = s.peek(0);
                    (builder, value)
                });
                let text = value_to_string(&ctx.heap, value);
                let Some(id) = builder.as_ref_id() else {
                    return Err(type_error("formatter expected on the stack"));
                };
                let HeapData::StrBuilder(data) = ctx.heap.get_mut(id) else {
                    return Err(type_error("formatter expected on the stack"));
                };
                data.append(&text);
            }
            Opcode::FormatResult => {
                set_pc(ctx, stack, pc);
                let builder = with_stack(ctx, stack, CoroutineStack::pop);
                let Some(id) = builder.as_ref_id() else {
                    return Err(type_error("formatter expected on the stack"));
                };
                let HeapData::StrBuilder(data) = ctx.heap.get(id) else {
                    return Err(type_error("formatter expected on the stack"));
                };
                let content = data.buffer.clone();
                let string = ctx.heap.allocate(HeapData::Str(Str::new(&content)));
                with_stack(ctx, stack, |s| s.push(Value::Ref(string)));
            }
            Opcode::Jmp => {
                let target = read_u32(&frame.code, &mut pc) as usize;
                set_pc(ctx, stack, target);
            }
            Opcode::JmpTrue => {
                let target = read_u32(&frame.code, &mut pc) as usize;
                let condition = with_stack(ctx, stack, CoroutineStack::pop);
                let taken = truthy(condition)?;
                set_pc(ctx, stack, if taken { target } else { pc });
            }
            Opcode::JmpFalse => {
                let target = read_u32(&frame.code, &mut pc) as usize;
                let condition = with_stack(ctx, stack, CoroutineStack::pop);
                let taken = !truthy(condition)?;
                set_pc(ctx, stack, if taken { target } else { pc });
            }
            Opcode::Call => {
                let argc = read_u32(&frame.code, &mut pc);
                set_pc(ctx, stack, pc);
                match call_value(ctx, stack, argc, CallKind::Plain)? {
                    CallAction::FramePushed | CallAction::ValueReady => {}
                    CallAction::Yielded => return Ok(CoroutineStep::Yield),
                }
            }
            Opcode::CallMethod => {
                let argc = read_u32(&frame.code, &mut pc);
                set_pc(ctx, stack, pc);
                match call_value(ctx, stack, argc, CallKind::Method)? {
                    CallAction::FramePushed | CallAction::ValueReady => {}
                    CallAction::Yielded => return Ok(CoroutineStep::Yield),
                }
            }
            Opcode::Return => {
                set_pc(ctx, stack, pc);
                let finished = with_stack(ctx, stack, |s| {
                    let result = s.pop();
                    let frame = s.frames.pop().expect("return requires a frame");
                    s.values.truncate(frame.base);
                    s.pop(); // the callee slot below the arguments
                    if frame.flags & FRAME_POP_ONE_MORE != 0 {
                        s.pop();
                    }
                    if s.frames.is_empty() {
                        Some(result)
                    } else {
                        s.push(result);
                        None
                    }
                });
                if let Some(result) = finished {
                    return Ok(CoroutineStep::Done(result));
                }
            }
            Opcode::AssertFail => {
                set_pc(ctx, stack, pc);
                let (expr, message) = with_stack(ctx, stack, |s| {
                    let message = s.pop();
                    let expr = s.pop();
                    (expr, message)
                });
                let message = if message.is_null() {
                    let expr = ctx.heap.as_str(expr).unwrap_or("<expression>");
                    format!("assertion `{expr}` failed")
                } else {
                    value_to_string(&ctx.heap, message)
                };
                return Err(RunError::new(ErrorKind::AssertionFailed, message));
            }
        }
    }
}

fn pop_values(ctx: &mut Context, stack: HeapId, count: usize) -> Vec<Value> {
    with_stack(ctx, stack, |s| {
        let start = s.values.len() - count;
        s.values.split_off(start)
    })
}

// --- calls ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    /// Stack: `[callee, args...]`.
    Plain,
    /// Stack: `[function, instance-or-null, args...]`.
    Method,
}

enum CallAction {
    FramePushed,
    /// The call completed synchronously; its result is on the stack.
    ValueReady,
    /// The current coroutine parked; null is already pushed as the resume
    /// result.
    Yielded,
}

fn call_value(ctx: &mut Context, stack: HeapId, argc: u32, kind: CallKind) -> RunResult<CallAction> {
    let (callee, instance) = with_stack(ctx, stack, |s| match kind {
        CallKind::Plain => (s.peek(argc as usize), Value::Null),
        CallKind::Method => (s.peek(argc as usize + 1), s.peek(argc as usize)),
    });

    let Some(callee_id) = callee.as_ref_id() else {
        return Err(type_error(format!(
            "value of type {} is not callable",
            ctx.heap.value_type(callee)
        )));
    };

    match ctx.heap.get(callee_id) {
        HeapData::Function(function) => {
            let template_id = function.template;
            let env = function.env;
            let HeapData::FunctionTemplate(template) = ctx.heap.get(template_id) else {
                unreachable!()
            };
            let (params, locals) = (template.params, template.locals);

            // Method calls pass the instance as an implicit first argument
            // unless the member was a plain function.
            let (frame_args, flags) = match kind {
                CallKind::Plain => (argc, 0),
                CallKind::Method if instance.is_null() => {
                    // Drop the null instance slot; the function value below
                    // it is cleaned up after the return.
                    with_stack(ctx, stack, |s| {
                        let at = s.values.len() - argc as usize - 1;
                        s.values.remove(at);
                    });
                    (argc, FRAME_POP_ONE_MORE)
                }
                CallKind::Method => (argc + 1, 0),
            };
            if params != frame_args {
                return Err(RunError::new(
                    ErrorKind::WrongArity,
                    format!("function expects {params} arguments, got {frame_args}"),
                ));
            }
            with_stack(ctx, stack, |s| {
                s.push_frame(template_id, env, frame_args, locals, flags);
            });
            Ok(CallAction::FramePushed)
        }
        HeapData::BoundMethod(method) => {
            let function = method.function;
            let instance = method.instance;
            // Unwrap: replace the bound method with its function, splice the
            // instance in front of the arguments and call again as a plain
            // call. In the method protocol the instance slot is the null a
            // plain member pushed; it becomes the receiver slot.
            with_stack(ctx, stack, |s| match kind {
                CallKind::Plain => {
                    let callee_at = s.values.len() - argc as usize - 1;
                    s.values[callee_at] = function;
                    s.values.insert(callee_at + 1, instance);
                }
                CallKind::Method => {
                    let callee_at = s.values.len() - argc as usize - 2;
                    debug_assert!(s.values[callee_at + 1].is_null());
                    s.values[callee_at] = function;
                    s.values[callee_at + 1] = instance;
                }
            });
            call_value(ctx, stack, argc + 1, CallKind::Plain)
        }
        HeapData::NativeFunction(native) => {
            let (params, func, name) = (native.params, native.func, native.name);
            let this = match kind {
                CallKind::Method if !instance.is_null() => instance,
                _ => Value::Null,
            };
            if params != VARIADIC && params != argc {
                return Err(RunError::new(
                    ErrorKind::WrongArity,
                    format!("{name} expects {params} arguments, got {argc}"),
                ));
            }
            let args: SmallVec<[Value; 8]> = with_stack(ctx, stack, |s| {
                let start = s.values.len() - argc as usize;
                let args = s.values.split_off(start);
                // Drop the callee (and the instance slot for method calls).
                s.pop();
                if kind == CallKind::Method {
                    s.pop();
                }
                args.into_iter().collect()
            });
            match func(ctx, this, &args)? {
                NativeResult::Value(value) => {
                    with_stack(ctx, stack, |s| s.push(value));
                    Ok(CallAction::ValueReady)
                }
                NativeResult::Yield => {
                    // The parked call resumes with null.
                    with_stack(ctx, stack, |s| s.push(Value::Null));
                    Ok(CallAction::Yielded)
                }
            }
        }
        other => Err(type_error(format!(
            "value of type {} is not callable",
            other.value_type()
        ))),
    }
}

// --- member access ---

/// The symbol named by a module member index.
fn member_symbol(ctx: &Context, module: HeapId, member: u32) -> HeapId {
    let HeapData::Module(data) = ctx.heap.get(module) else {
        panic!("not a module");
    };
    let Value::Ref(id) = data.members[member as usize] else {
        panic!("member {member} is not a symbol");
    };
    id
}

/// Reads a module member, resolving lazy imports on first touch.
pub fn resolve_module_member(ctx: &mut Context, module: HeapId, member: u32) -> RunResult<Value> {
    let HeapData::Module(data) = ctx.heap.get(module) else {
        panic!("not a module");
    };
    let value = data.members[member as usize];
    if value != Value::Undefined {
        return Ok(value);
    }
    let Some(&name) = data.imports.get(&member) else {
        return Ok(value);
    };
    let name_text = ctx.heap.as_str(Value::Ref(name)).unwrap_or("").to_owned();
    let Some(imported) = ctx.find_module(&name_text) else {
        return Err(RunError::new(
            ErrorKind::UnresolvedImport,
            format!("imported module '{name_text}' was not found"),
        ));
    };
    let HeapData::Module(data) = ctx.heap.get_mut(module) else {
        unreachable!()
    };
    data.members[member as usize] = Value::Ref(imported);
    Ok(Value::Ref(imported))
}

fn symbol_name(ctx: &Context, symbol: HeapId) -> HeapId {
    let HeapData::Symbol(data) = ctx.heap.get(symbol) else {
        panic!("not a symbol");
    };
    data.name
}

fn member_error(ctx: &Context, object: Value, symbol: HeapId) -> RunError {
    let name = ctx.heap.as_str(Value::Ref(symbol_name(ctx, symbol))).unwrap_or("");
    RunError::new(
        ErrorKind::UnknownMember,
        format!("value of type {} has no member '{name}'", ctx.heap.value_type(object)),
    )
}

fn load_member(ctx: &mut Context, object: Value, symbol: HeapId) -> RunResult<Value> {
    let name = symbol_name(ctx, symbol);
    if let Some(id) = object.as_ref_id() {
        match ctx.heap.get(id) {
            HeapData::Module(module) => {
                let Some(slot) = module.export_slot(symbol) else {
                    return Err(member_error(ctx, object, symbol));
                };
                return resolve_module_member(ctx, id, slot);
            }
            HeapData::Record(record) => {
                return record
                    .field_index(name)
                    .map(|index| record.values[index])
                    .ok_or_else(|| member_error(ctx, object, symbol));
            }
            HeapData::DynamicObject(dynamic) => {
                return dynamic
                    .properties
                    .get(&name)
                    .copied()
                    .ok_or_else(|| member_error(ctx, object, symbol));
            }
            _ => {}
        }
    }

    // Fall back to the type's method table; methods read as members bind
    // their receiver.
    let tag = ctx.heap.value_type(object);
    match ctx.method_of(tag, name) {
        Some(entry) => {
            if let Some(entry_id) = entry.as_ref_id()
                && let HeapData::Method(method) = ctx.heap.get(entry_id)
            {
                let function = method.function;
                let bound = ctx.heap.allocate(HeapData::BoundMethod(BoundMethod {
                    function,
                    instance: object,
                }));
                Ok(Value::Ref(bound))
            } else {
                Ok(entry)
            }
        }
        None => Err(member_error(ctx, object, symbol)),
    }
}

fn store_member(ctx: &mut Context, object: Value, symbol: HeapId, value: Value) -> RunResult<()> {
    let name = symbol_name(ctx, symbol);
    let Some(id) = object.as_ref_id() else {
        return Err(member_error(ctx, object, symbol));
    };
    match ctx.heap.get_mut(id) {
        HeapData::Record(record) => {
            let Some(index) = record.field_index(name) else {
                return Err(member_error(ctx, object, symbol));
            };
            record.values[index] = value;
            Ok(())
        }
        HeapData::DynamicObject(dynamic) => {
            dynamic.properties.insert(name, value);
            Ok(())
        }
        _ => Err(RunError::new(
            ErrorKind::UnsupportedOperation,
            format!("cannot assign members on a {}", ctx.heap.value_type(object)),
        )),
    }
}

/// Resolution for the method-call protocol: returns the function to invoke
/// and the instance slot (the object for instance methods, null for plain
/// function members).
fn load_method(ctx: &mut Context, object: Value, symbol: HeapId) -> RunResult<(Value, Value)> {
    let name = symbol_name(ctx, symbol);
    if let Some(id) = object.as_ref_id() {
        match ctx.heap.get(id) {
            HeapData::Module(module) => {
                let Some(slot) = module.export_slot(symbol) else {
                    return Err(member_error(ctx, object, symbol));
                };
                let value = resolve_module_member(ctx, id, slot)?;
                return Ok((value, Value::Null));
            }
            HeapData::Record(record) => {
                if let Some(index) = record.field_index(name) {
                    return Ok((record.values[index], Value::Null));
                }
            }
            HeapData::DynamicObject(dynamic) => {
                if let Some(&value) = dynamic.properties.get(&name) {
                    return Ok((value, Value::Null));
                }
            }
            _ => {}
        }
    }

    let tag = ctx.heap.value_type(object);
    match ctx.method_of(tag, name) {
        Some(entry) => {
            if let Some(entry_id) = entry.as_ref_id()
                && let HeapData::Method(method) = ctx.heap.get(entry_id)
            {
                Ok((method.function, object))
            } else {
                Ok((entry, Value::Null))
            }
        }
        None => {
            let name = ctx.heap.as_str(Value::Ref(name)).unwrap_or("");
            Err(RunError::new(
                ErrorKind::NoSuchMethod,
                format!("value of type {tag} has no method '{name}'"),
            ))
        }
    }
}

fn tuple_member(ctx: &Context, object: Value, index: usize) -> RunResult<Value> {
    let Some(id) = object.as_ref_id() else {
        return Err(type_error("tuple member access on a non-tuple value"));
    };
    let HeapData::Tuple(tuple) = ctx.heap.get(id) else {
        return Err(type_error("tuple member access on a non-tuple value"));
    };
    tuple.items.get(index).copied().ok_or_else(|| {
        RunError::new(
            ErrorKind::OutOfBounds,
            format!("tuple index {index} out of bounds for a tuple of size {}", tuple.items.len()),
        )
    })
}

fn store_tuple_member(ctx: &mut Context, object: Value, index: usize, value: Value) -> RunResult<()> {
    let Some(id) = object.as_ref_id() else {
        return Err(type_error("tuple member access on a non-tuple value"));
    };
    let HeapData::Tuple(tuple) = ctx.heap.get_mut(id) else {
        return Err(type_error("tuple member access on a non-tuple value"));
    };
    let size = tuple.items.len();
    match tuple.items.get_mut(index) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(RunError::new(
            ErrorKind::OutOfBounds,
            format!("tuple index {index} out of bounds for a tuple of size {size}"),
        )),
    }
}

fn index_as_usize(ctx: &Context, index: Value, size: usize) -> RunResult<usize> {
    let value = ctx
        .heap
        .as_int(index)
        .ok_or_else(|| type_error("index must be an integer"))?;
    if value < 0 || value as usize >= size {
        return Err(RunError::new(
            ErrorKind::OutOfBounds,
            format!("index {value} out of bounds for size {size}"),
        ));
    }
    Ok(value as usize)
}

fn load_index(ctx: &mut Context, object: Value, index: Value) -> RunResult<Value> {
    let Some(id) = object.as_ref_id() else {
        return Err(type_error(format!(
            "values of type {} cannot be indexed",
            ctx.heap.value_type(object)
        )));
    };
    match ctx.heap.get(id) {
        HeapData::Array(array) => {
            let storage = array.storage;
            let HeapData::ArrayStorage(storage) = ctx.heap.get(storage) else {
                unreachable!()
            };
            let at = index_as_usize(ctx, index, storage.items.len())?;
            Ok(storage.items[at])
        }
        HeapData::Tuple(tuple) => {
            let at = index_as_usize(ctx, index, tuple.items.len())?;
            Ok(tuple.items[at])
        }
        HeapData::Buffer(buffer) => {
            let at = index_as_usize(ctx, index, buffer.bytes.len())?;
            Ok(Value::SmallInt(i64::from(buffer.bytes[at])))
        }
        HeapData::HashTable(table) => {
            let storage = table.storage;
            let slot = crate::vm::methods::table_find(&ctx.heap, storage, index)?;
            let HeapData::HashTableStorage(data) = ctx.heap.get(storage) else {
                unreachable!()
            };
            slot.and_then(|slot| data.entries[slot as usize])
                .map(|(_, value)| value)
                .ok_or_else(|| {
                    RunError::new(
                        ErrorKind::OutOfBounds,
                        format!("key {} not found", value_to_string(&ctx.heap, index)),
                    )
                })
        }
        other => Err(type_error(format!(
            "values of type {} cannot be indexed",
            other.value_type()
        ))),
    }
}

fn store_index(ctx: &mut Context, object: Value, index: Value, value: Value) -> RunResult<()> {
    let Some(id) = object.as_ref_id() else {
        return Err(type_error(format!(
            "values of type {} cannot be indexed",
            ctx.heap.value_type(object)
        )));
    };
    match ctx.heap.get(id) {
        HeapData::Array(array) => {
            let storage = array.storage;
            let HeapData::ArrayStorage(data) = ctx.heap.get(storage) else {
                unreachable!()
            };
            let at = index_as_usize(ctx, index, data.items.len())?;
            let HeapData::ArrayStorage(data) = ctx.heap.get_mut(storage) else {
                unreachable!()
            };
            data.items[at] = value;
            Ok(())
        }
        HeapData::Buffer(_) => {
            let byte = ctx
                .heap
                .as_int(value)
                .filter(|&byte| (0..=255).contains(&byte))
                .ok_or_else(|| RunError::new(ErrorKind::BadArgument, "buffer values must be bytes"))?;
            let HeapData::Buffer(buffer) = ctx.heap.get(id) else {
                unreachable!()
            };
            let at = index_as_usize(ctx, index, buffer.bytes.len())?;
            let HeapData::Buffer(buffer) = ctx.heap.get_mut(id) else {
                unreachable!()
            };
            buffer.bytes[at] = byte as u8;
            Ok(())
        }
        HeapData::HashTable(table) => {
            let storage = table.storage;
            crate::vm::methods::table_insert(&mut ctx.heap, storage, index, value)
        }
        other => Err(type_error(format!(
            "values of type {} cannot be indexed",
            other.value_type()
        ))),
    }
}

fn env_at(ctx: &Context, env: Value, levels: u32) -> RunResult<HeapId> {
    let mut current = env;
    for _ in 0..levels {
        let Some(id) = current.as_ref_id() else {
            return Err(type_error("closure environment chain is too short"));
        };
        let HeapData::Environment(data) = ctx.heap.get(id) else {
            return Err(type_error("closure environment chain is corrupt"));
        };
        current = data.parent;
    }
    current
        .as_ref_id()
        .filter(|&id| matches!(ctx.heap.get(id), HeapData::Environment(_)))
        .ok_or_else(|| type_error("closure environment chain is too short"))
}

// --- operators ---

fn numeric_operand(ctx: &Context, value: Value) -> RunResult<f64> {
    ctx.heap.numeric(value).ok_or_else(|| {
        type_error(format!(
            "expected a number, got a {}",
            ctx.heap.value_type(value)
        ))
    })
}

fn int_operand(ctx: &Context, value: Value) -> RunResult<i64> {
    ctx.heap.as_int(value).ok_or_else(|| {
        type_error(format!(
            "expected an integer, got a {}",
            ctx.heap.value_type(value)
        ))
    })
}

fn binary_op(ctx: &mut Context, op: Opcode, left: Value, right: Value) -> RunResult<Value> {
    match op {
        Opcode::Add => {
            // String concatenation renders the other operand.
            if ctx.heap.as_str(left).is_some() || ctx.heap.as_str(right).is_some() {
                let mut text = value_to_string(&ctx.heap, left);
                text.push_str(&value_to_string(&ctx.heap, right));
                let string = ctx.heap.allocate(HeapData::Str(Str::new(&text)));
                return Ok(Value::Ref(string));
            }
            arithmetic(ctx, left, right, i64::checked_add, |a, b| a + b, "+")
        }
        Opcode::Sub => arithmetic(ctx, left, right, i64::checked_sub, |a, b| a - b, "-"),
        Opcode::Mul => arithmetic(ctx, left, right, i64::checked_mul, |a, b| a * b, "*"),
        Opcode::Div => {
            if let (Some(a), Some(b)) = (ctx.heap.as_int(left), ctx.heap.as_int(right)) {
                if b == 0 {
                    return Err(RunError::new(ErrorKind::DivideByZero, "integer division by zero"));
                }
                let value = a
                    .checked_div(b)
                    .ok_or_else(|| RunError::new(ErrorKind::IntegerOverflow, "integer division overflow"))?;
                return Ok(ctx.heap.box_int(value));
            }
            let (a, b) = (numeric_operand(ctx, left)?, numeric_operand(ctx, right)?);
            let result = ctx.heap.allocate(HeapData::Float(a / b));
            Ok(Value::Ref(result))
        }
        Opcode::Mod => {
            if let (Some(a), Some(b)) = (ctx.heap.as_int(left), ctx.heap.as_int(right)) {
                if b == 0 {
                    return Err(RunError::new(ErrorKind::DivideByZero, "integer modulo by zero"));
                }
                let value = a
                    .checked_rem(b)
                    .ok_or_else(|| RunError::new(ErrorKind::IntegerOverflow, "integer modulo overflow"))?;
                return Ok(ctx.heap.box_int(value));
            }
            let (a, b) = (numeric_operand(ctx, left)?, numeric_operand(ctx, right)?);
            let result = ctx.heap.allocate(HeapData::Float(a % b));
            Ok(Value::Ref(result))
        }
        Opcode::Pow => {
            if let (Some(a), Some(b)) = (ctx.heap.as_int(left), ctx.heap.as_int(right))
                && b >= 0
            {
                let exponent = u32::try_from(b)
                    .map_err(|_| RunError::new(ErrorKind::IntegerOverflow, "integer exponent is too large"))?;
                let value = a
                    .checked_pow(exponent)
                    .ok_or_else(|| RunError::new(ErrorKind::IntegerOverflow, "integer power overflow"))?;
                return Ok(ctx.heap.box_int(value));
            }
            let (a, b) = (numeric_operand(ctx, left)?, numeric_operand(ctx, right)?);
            let result = ctx.heap.allocate(HeapData::Float(a.powf(b)));
            Ok(Value::Ref(result))
        }
        Opcode::LSh => {
            let (a, b) = (int_operand(ctx, left)?, int_operand(ctx, right)?);
            let shift =
                u32::try_from(b).map_err(|_| RunError::new(ErrorKind::BadArgument, "invalid shift amount"))?;
            let value = a
                .checked_shl(shift)
                .ok_or_else(|| RunError::new(ErrorKind::BadArgument, "shift amount out of range"))?;
            Ok(ctx.heap.box_int(value))
        }
        Opcode::RSh => {
            let (a, b) = (int_operand(ctx, left)?, int_operand(ctx, right)?);
            let shift =
                u32::try_from(b).map_err(|_| RunError::new(ErrorKind::BadArgument, "invalid shift amount"))?;
            let value = a
                .checked_shr(shift)
                .ok_or_else(|| RunError::new(ErrorKind::BadArgument, "shift amount out of range"))?;
            Ok(ctx.heap.box_int(value))
        }
        Opcode::BAnd => {
            let (a, b) = (int_operand(ctx, left)?, int_operand(ctx, right)?);
            Ok(ctx.heap.box_int(a & b))
        }
        Opcode::BOr => {
            let (a, b) = (int_operand(ctx, left)?, int_operand(ctx, right)?);
            Ok(ctx.heap.box_int(a | b))
        }
        Opcode::BXor => {
            let (a, b) = (int_operand(ctx, left)?, int_operand(ctx, right)?);
            Ok(ctx.heap.box_int(a ^ b))
        }
        Opcode::Eq => Ok(Value::Bool(ctx.heap.values_equal(left, right))),
        Opcode::NEq => Ok(Value::Bool(!ctx.heap.values_equal(left, right))),
        Opcode::Lt | Opcode::Lte | Opcode::Gt | Opcode::Gte => {
            let ordering = compare(ctx, left, right)?;
            let result = match op {
                Opcode::Lt => ordering.is_lt(),
                Opcode::Lte => ordering.is_le(),
                Opcode::Gt => ordering.is_gt(),
                Opcode::Gte => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        _ => unreachable!("not a binary opcode: {op}"),
    }
}

fn arithmetic(
    ctx: &mut Context,
    left: Value,
    right: Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
    symbol: &str,
) -> RunResult<Value> {
    if let (Some(a), Some(b)) = (ctx.heap.as_int(left), ctx.heap.as_int(right)) {
        let value = int_op(a, b)
            .ok_or_else(|| RunError::new(ErrorKind::IntegerOverflow, format!("integer overflow in '{symbol}'")))?;
        return Ok(ctx.heap.box_int(value));
    }
    let (a, b) = (numeric_operand(ctx, left)?, numeric_operand(ctx, right)?);
    let result = ctx.heap.allocate(HeapData::Float(float_op(a, b)));
    Ok(Value::Ref(result))
}

fn compare(ctx: &Context, left: Value, right: Value) -> RunResult<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (ctx.heap.as_int(left), ctx.heap.as_int(right)) {
        return Ok(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (ctx.heap.numeric(left), ctx.heap.numeric(right)) {
        return a
            .partial_cmp(&b)
            .ok_or_else(|| RunError::new(ErrorKind::UnsupportedOperation, "cannot order nan values"));
    }
    if let (Some(a), Some(b)) = (ctx.heap.as_str(left), ctx.heap.as_str(right)) {
        return Ok(a.cmp(b));
    }
    Err(type_error(format!(
        "cannot order values of type {} and {}",
        ctx.heap.value_type(left),
        ctx.heap.value_type(right)
    )))
}

fn unary_op(ctx: &mut Context, op: Opcode, operand: Value) -> RunResult<Value> {
    match op {
        Opcode::UNeg => {
            if let Some(value) = ctx.heap.as_int(operand) {
                let value = value
                    .checked_neg()
                    .ok_or_else(|| RunError::new(ErrorKind::IntegerOverflow, "integer negation overflow"))?;
                return Ok(ctx.heap.box_int(value));
            }
            let value = numeric_operand(ctx, operand)?;
            let result = ctx.heap.allocate(HeapData::Float(-value));
            Ok(Value::Ref(result))
        }
        Opcode::UPos => {
            if ctx.heap.numeric(operand).is_none() {
                return Err(type_error("unary '+' expects a number"));
            }
            Ok(operand)
        }
        Opcode::LNot => Ok(Value::Bool(!truthy(operand)?)),
        Opcode::BNot => {
            let value = int_operand(ctx, operand)?;
            Ok(ctx.heap.box_int(!value))
        }
        _ => unreachable!("not a unary opcode: {op}"),
    }
}
