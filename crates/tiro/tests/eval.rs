//! End-to-end evaluation tests: compile a module, load it into a fresh
//! context and call its exports.

use tiro::{
    Context, Diagnostics, ErrorKind, HeapId, RunResult, Value, compile,
    tracer::{RecordingTracer, TraceEvent},
};

fn load(source: &str) -> (Context, HeapId) {
    let mut diagnostics = Diagnostics::new();
    let module = compile("test", source, &mut diagnostics)
        .unwrap_or_else(|| panic!("compilation failed:\n{}", diagnostics.render("test", source)));
    let mut ctx = Context::new();
    let loaded = ctx.load(&module).expect("module loads");
    (ctx, loaded)
}

fn call(source: &str, function: &str) -> (Context, RunResult<Value>) {
    let (mut ctx, module) = load(source);
    let result = ctx.call_export(module, function, &[]);
    (ctx, result)
}

fn call_int(source: &str, function: &str) -> i64 {
    let (ctx, result) = call(source, function);
    let value = result.expect("call succeeds");
    ctx.as_int(value).expect("integer result")
}

fn call_str(source: &str, function: &str) -> String {
    let (ctx, result) = call(source, function);
    let value = result.expect("call succeeds");
    ctx.as_str(value).expect("string result").to_owned()
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(call_int("export func f() = 1 + 2 * 3;", "f"), 7);
}

#[test]
fn string_concatenation_in_a_loop() {
    let source = r#"
        export func f() {
            var s = "";
            for (var i = 0; i < 3; i = i + 1) {
                s = s + i;
            }
            return s;
        }
    "#;
    assert_eq!(call_str(source, "f"), "012");
}

#[test]
fn indexed_loop_over_an_array() {
    let source = r#"
        export func f() {
            const a = [10, 20, 30];
            var t = 0;
            for (var i = 0; i < a.size(); i = i + 1) {
                t = t + a[i];
            }
            return t;
        }
    "#;
    assert_eq!(call_int(source, "f"), 60);
}

#[test]
fn closure_captures_across_scopes() {
    let source = r#"
        export func outer() {
            var b = 2;
            while (1) {
                var a = 1;
                return (func() = a + b)();
            }
        }
    "#;
    assert_eq!(call_int(source, "outer"), 3);
}

#[test]
fn assertion_failure_carries_the_message() {
    let source = r#"export func g() { assert(1 == 2, "nope"); }"#;
    let (_ctx, result) = call(source, "g");
    let error = result.expect_err("assertion fails");
    assert_eq!(error.kind, ErrorKind::AssertionFailed);
    assert_eq!(error.message, "nope");
}

#[test]
fn assertion_without_message_names_the_expression() {
    let source = "export func g() { assert(1 == 2); }";
    let (_ctx, result) = call(source, "g");
    let error = result.expect_err("assertion fails");
    assert_eq!(error.kind, ErrorKind::AssertionFailed);
    assert!(error.message.contains("1 == 2"), "message: {}", error.message);
}

#[test]
fn counter_closure_keeps_state() {
    let source = r#"
        export func make_counter(start) {
            var n = start;
            return func() {
                n = n + 1;
                return n;
            };
        }
        export func counter_test() {
            const c = make_counter(10);
            c();
            c();
            return c();
        }
    "#;
    assert_eq!(call_int(source, "counter_test"), 13);
}

#[test]
fn recursion() {
    let source = r#"
        export func fib(n) {
            if (n < 2) { return n; }
            return fib(n - 1) + fib(n - 2);
        }
        export func f() = fib(10);
    "#;
    assert_eq!(call_int(source, "f"), 55);
}

#[test]
fn break_and_continue() {
    let source = r#"
        export func g() {
            var total = 0;
            for (var i = 0; i < 10; i = i + 1) {
                if (i == 3) { continue; }
                if (i > 5) { break; }
                total = total + i;
            }
            return total;
        }
    "#;
    assert_eq!(call_int(source, "g"), 12);
}

#[test]
fn if_expression_produces_a_value() {
    let source = r#"
        export func pick(flag) = if (flag) { 1 } else { 2 };
        export func f() = pick(true) * 10 + pick(false);
    "#;
    assert_eq!(call_int(source, "f"), 12);
}

#[test]
fn logical_operators_short_circuit() {
    let source = r#"
        var touched = 0;
        func touch() {
            touched = touched + 1;
            return true;
        }
        export func f() {
            const a = false && touch();
            const b = true || touch();
            if (a || !b) { return -1; }
            return touched;
        }
    "#;
    assert_eq!(call_int(source, "f"), 0);
}

#[test]
fn tuple_destructuring_and_assignment() {
    let source = r#"
        export func swap() {
            var (a, b) = (1, 2);
            (a, b) = (b, a);
            return a * 10 + b;
        }
    "#;
    assert_eq!(call_int(source, "swap"), 21);
}

#[test]
fn records_read_and_write_fields() {
    let source = r#"
        export func rec() {
            const r = (x: 1, y: 2);
            r.y = 5;
            return r.x + r.y;
        }
    "#;
    assert_eq!(call_int(source, "rec"), 6);
}

#[test]
fn map_literal_and_methods() {
    let source = r#"
        export func m() {
            const t = map{"a": 1, "b": 2};
            t["c"] = 3;
            if (!t.contains("a")) { return -1; }
            return t.size() + t["c"];
        }
    "#;
    assert_eq!(call_int(source, "m"), 6);
}

#[test]
fn set_literal_and_methods() {
    let source = r#"
        export func s() {
            const items = set{1, 2, 2, 3};
            items.add(4);
            items.remove(1);
            return items.size();
        }
    "#;
    assert_eq!(call_int(source, "s"), 3);
}

#[test]
fn array_methods() {
    let source = r#"
        export func a() {
            const xs = [];
            xs.push(5);
            xs.push(7);
            const last = xs.pop();
            return xs.size() * 100 + last;
        }
    "#;
    assert_eq!(call_int(source, "a"), 107);
}

#[test]
fn string_interpolation() {
    let source = r#"
        export func f() {
            const name = "world";
            const n = 42;
            return "hello ${name}, ${n / 2} and $n";
        }
    "#;
    assert_eq!(call_str(source, "f"), "hello world, 21 and 42");
}

#[test]
fn string_methods() {
    let source = r#"
        export func f() {
            const s = "hello world";
            const part = s.slice(6, 5);
            if (!s.contains("lo w")) { return "bad"; }
            return part + ":" + s.size();
        }
    "#;
    assert_eq!(call_str(source, "f"), "world:11");
}

#[test]
fn module_variables_are_initialized_in_order() {
    let source = r#"
        var base = 10;
        var doubled = base * 2;
        export func f() = base + doubled;
    "#;
    assert_eq!(call_int(source, "f"), 30);
}

#[test]
fn exported_module_variables_are_readable_from_the_host() {
    let source = r#"
        export var answer = 40 + 2;
        export func f() = answer;
    "#;
    let (mut ctx, module) = load(source);
    let value = ctx.get_export(module, "answer").expect("export exists");
    assert_eq!(ctx.as_int(value), Some(42));
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let (_ctx, result) = call("export func f() = 1 / 0;", "f");
    let error = result.expect_err("division fails");
    assert_eq!(error.kind, ErrorKind::DivideByZero);
}

#[test]
fn wrong_arity_is_a_runtime_error() {
    let source = r#"
        func two(a, b) = a + b;
        export func f() = two(1);
    "#;
    let (_ctx, result) = call(source, "f");
    assert_eq!(result.expect_err("arity mismatch").kind, ErrorKind::WrongArity);
}

#[test]
fn integer_overflow_boxes_transparently() {
    // 2^62 exceeds the inline range but still fits an i64.
    let source = "export func f() = (2 ** 61 - 1) + 1 - 1;";
    assert_eq!(call_int(source, "f"), (1i64 << 61) - 1);
}

#[test]
fn compile_errors_return_no_module() {
    let mut diagnostics = Diagnostics::new();
    let module = compile("broken", "export func f() { return x; }", &mut diagnostics);
    assert!(module.is_none());
    assert!(diagnostics.has_errors());
}

#[test]
fn use_before_definition_is_rejected() {
    let mut diagnostics = Diagnostics::new();
    let module = compile("broken", "export func f() { const a = b; const b = 1; return a; }", &mut diagnostics);
    assert!(module.is_none());
    assert!(diagnostics.has_errors());
}

#[test]
fn assignment_to_const_is_rejected() {
    let mut diagnostics = Diagnostics::new();
    let module = compile("broken", "export func f() { const a = 1; a = 2; return a; }", &mut diagnostics);
    assert!(module.is_none());
    assert!(diagnostics.has_errors());
}

#[test]
fn garbage_collection_preserves_reachable_state() {
    let source = r#"
        export var data = [];
        export func fill() {
            for (var i = 0; i < 100; i = i + 1) {
                data.push("item ${i}");
            }
            return data.size();
        }
    "#;
    let (mut ctx, module) = load(source);
    let recorder = RecordingTracer::new();
    ctx.set_tracer(Box::new(recorder.clone()));
    let filled = ctx.call_export(module, "fill", &[]).expect("fill succeeds");
    assert_eq!(ctx.as_int(filled), Some(100));

    let before = ctx.heap.live_objects();
    ctx.collect_garbage();
    ctx.collect_garbage();
    assert!(ctx.heap.live_objects() <= before);

    // Both collections reported themselves, and neither grew the heap.
    let collections: Vec<TraceEvent> = recorder
        .events()
        .into_iter()
        .filter(|event| matches!(event, TraceEvent::Collection { .. }))
        .collect();
    assert_eq!(collections.len(), 2);
    for event in &collections {
        let TraceEvent::Collection { live_before, live_after } = event else {
            unreachable!()
        };
        assert!(live_after <= live_before);
    }

    // The array survives both collections and stays intact.
    let data = ctx.get_export(module, "data").expect("export exists");
    let result = ctx.call_export(module, "fill", &[]).expect("second fill succeeds");
    assert_eq!(ctx.as_int(result), Some(200));
    let _ = data;
}

#[test]
fn compiled_modules_round_trip_through_the_wire_format() {
    let source = r#"
        export func f() {
            const greeting = "hello";
            return "${greeting}, ${6 * 7}";
        }
    "#;
    let mut diagnostics = Diagnostics::new();
    let module = compile("wire", source, &mut diagnostics).expect("compiles");

    let bytes = module.to_bytes().expect("serializes");
    let restored = tiro::CompiledModule::from_bytes(&bytes).expect("deserializes");

    let mut ctx = Context::new();
    let loaded = ctx.load(&restored).expect("restored module loads");
    let value = ctx.call_export(loaded, "f", &[]).expect("call succeeds");
    assert_eq!(ctx.as_str(value), Some("hello, 42"));
}

#[test]
fn dead_code_does_not_change_results() {
    let source = r#"
        export func f() {
            var unused = 1 + 2;
            var also_unused = [1, 2, 3];
            return 5;
        }
    "#;
    assert_eq!(call_int(source, "f"), 5);
}
