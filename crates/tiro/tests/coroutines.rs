//! Coroutine scheduling, yield/resume and the token state machine.

use tiro::{
    Context, CoroutineState, Diagnostics, HeapId, compile,
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

const YIELDING_PROGRAM: &str = r#"
    import std;

    export var status = "initial";
    export var token = null;
    export var worker = null;

    func work() {
        token = std.coroutine_token();
        status = "before";
        std.yield_coroutine();
        status = "after";
    }

    export func start() {
        worker = std.launch(work);
    }
"#;

fn export_str(ctx: &mut Context, module: HeapId, name: &str) -> String {
    let value = ctx.get_export(module, name).expect("export exists");
    ctx.as_str(value).expect("string export").to_owned()
}

#[test]
fn yield_suspends_and_resume_continues() {
    let (mut ctx, module) = load(YIELDING_PROGRAM);
    let recorder = RecordingTracer::new();
    ctx.set_tracer(Box::new(recorder.clone()));

    // `start` launches the worker; draining the ready queue runs it up to
    // its yield point.
    ctx.call_export(module, "start", &[]).expect("start succeeds");
    assert_eq!(export_str(&mut ctx, module, "status"), "before");

    let worker = ctx.get_export(module, "worker").expect("worker export");
    assert_eq!(ctx.coroutine_state(worker), Some(CoroutineState::Waiting));

    // Resuming the token makes the worker ready; another drain finishes it.
    let token = ctx.get_export(module, "token").expect("token export");
    assert!(ctx.resume_token(token).expect("resume succeeds"));
    assert_eq!(ctx.coroutine_state(worker), Some(CoroutineState::Ready));

    ctx.run_ready();
    assert_eq!(export_str(&mut ctx, module, "status"), "after");
    assert_eq!(ctx.coroutine_state(worker), Some(CoroutineState::Done));

    // The tracer saw every transition of the worker's lifecycle, in order:
    // it only ever moves Running -> Waiting -> Ready -> Running -> Done.
    assert_eq!(
        recorder.states_of("coroutine"),
        vec![
            CoroutineState::Running,
            CoroutineState::Waiting,
            CoroutineState::Ready,
            CoroutineState::Running,
            CoroutineState::Done,
        ]
    );
}

#[test]
fn failed_coroutines_report_an_error_event() {
    let source = r#"
        import std;

        func explode() {
            assert(false, "traced boom");
        }

        export func start() {
            std.launch(explode);
        }
    "#;
    let (mut ctx, module) = load(source);
    let recorder = RecordingTracer::new();
    ctx.set_tracer(Box::new(recorder.clone()));

    ctx.call_export(module, "start", &[]).expect("start succeeds");

    let errors: Vec<TraceEvent> = recorder
        .events()
        .into_iter()
        .filter(|event| matches!(event, TraceEvent::Error { .. }))
        .collect();
    assert_eq!(
        errors,
        vec![TraceEvent::Error {
            message: "AssertionFailed: traced boom".to_owned(),
        }]
    );
}

#[test]
fn tokens_are_single_use() {
    let (mut ctx, module) = load(YIELDING_PROGRAM);
    ctx.call_export(module, "start", &[]).expect("start succeeds");

    let token = ctx.get_export(module, "token").expect("token export");
    assert!(ctx.resume_token(token).expect("first resume succeeds"));
    // The token is consumed: further resumes are no-ops.
    assert!(!ctx.resume_token(token).expect("second resume is a no-op"));

    ctx.run_ready();
    assert!(!ctx.resume_token(token).expect("resume after completion is a no-op"));
}

#[test]
fn token_validity_is_observable_from_the_language() {
    let source = r#"
        import std;

        export var token = null;

        func work() {
            token = std.coroutine_token();
            std.yield_coroutine();
        }

        export func start() {
            std.launch(work);
        }
    "#;
    let (mut ctx, module) = load(source);
    ctx.call_export(module, "start", &[]).expect("start succeeds");

    let token = ctx.get_export(module, "token").expect("token export");
    assert!(ctx.resume_token(token).expect("resume succeeds"));
    ctx.run_ready();

    // A consumed token reports itself invalid.
    let checker = r#"
        export func check(t) = t.valid();
    "#;
    let mut diagnostics = Diagnostics::new();
    let module = compile("checker", checker, &mut diagnostics).expect("checker compiles");
    let checker_module = ctx.load(&module).expect("checker loads");
    let function = ctx.get_export(checker_module, "check").expect("check export");
    let result = ctx.call_function(function, &[token]).expect("check runs");
    assert_eq!(result, tiro::Value::Bool(false));
}

#[test]
fn coroutine_result_is_a_success_value() {
    let source = r#"
        import std;

        export var done = null;

        func produce() {
            return 41 + 1;
        }

        export func start() {
            done = std.launch(produce);
        }
        export func inspect() {
            const r = done.result();
            if (r.is_success()) {
                return r.value();
            }
            return -1;
        }
    "#;
    let (mut ctx, module) = load(source);
    ctx.call_export(module, "start", &[]).expect("start succeeds");

    let coroutine = ctx.get_export(module, "done").expect("coroutine export");
    assert_eq!(ctx.coroutine_state(coroutine), Some(CoroutineState::Done));

    let value = ctx.call_export(module, "inspect", &[]).expect("inspect succeeds");
    assert_eq!(ctx.as_int(value), Some(42));
}

#[test]
fn failed_coroutines_expose_a_failure_result() {
    let source = r#"
        import std;

        export var worker = null;

        func explode() {
            assert(false, "boom");
        }

        export func start() {
            worker = std.launch(explode);
        }
        export func inspect() {
            const r = worker.result();
            if (r.is_failure()) {
                return r.error();
            }
            return null;
        }
    "#;
    let (mut ctx, module) = load(source);
    ctx.call_export(module, "start", &[]).expect("start succeeds");

    let worker = ctx.get_export(module, "worker").expect("worker export");
    assert_eq!(ctx.coroutine_state(worker), Some(CoroutineState::Done));

    let error = ctx.call_export(module, "inspect", &[]).expect("inspect succeeds");
    assert_eq!(ctx.as_str(error), Some("boom"));
}

#[test]
fn reading_the_wrong_result_variant_is_an_error() {
    let source = r#"
        import std;

        export var worker = null;

        func fine() = 1;

        export func start() {
            worker = std.launch(fine);
        }
        export func wrong() = worker.result().error();
    "#;
    let (mut ctx, module) = load(source);
    ctx.call_export(module, "start", &[]).expect("start succeeds");

    let error = ctx
        .call_export(module, "wrong", &[])
        .expect_err("reading error() on a success fails");
    assert_eq!(error.kind, tiro::ErrorKind::WrongResultVariant);
}

#[test]
fn ready_coroutines_run_in_fifo_order() {
    let source = r#"
        import std;

        export var order = "";

        func first() { order = order + "a"; }
        func second() { order = order + "b"; }
        func third() { order = order + "c"; }

        export func start() {
            std.launch(first);
            std.launch(second);
            std.launch(third);
        }
    "#;
    let (mut ctx, module) = load(source);
    ctx.call_export(module, "start", &[]).expect("start succeeds");
    assert_eq!(export_str(&mut ctx, module, "order"), "abc");
}

#[test]
fn launch_passes_arguments() {
    let source = r#"
        import std;

        export var seen = 0;

        func record(a, b) {
            seen = a * 10 + b;
        }

        export func start() {
            std.launch(record, 4, 2);
        }
    "#;
    let (mut ctx, module) = load(source);
    ctx.call_export(module, "start", &[]).expect("start succeeds");
    let seen = ctx.get_export(module, "seen").expect("seen export");
    assert_eq!(ctx.as_int(seen), Some(42));
}
