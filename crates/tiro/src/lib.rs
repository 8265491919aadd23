#![doc = include_str!("../../../README.md")]

mod api;
mod ast;
mod bytecode;
mod compile;
mod diagnostics;
mod intern;
mod ir;
mod irgen;
mod lexer;
mod parser;
mod semantics;
mod span;
pub mod tracer;
mod vm;

pub use crate::{
    api::{
        ApiContext, ApiDiagnostics, ErrorLogFn, Settings, Status, context_free, context_load, context_new,
        diagnostics_clear, diagnostics_free, diagnostics_has_messages, diagnostics_new, diagnostics_print_stdout,
        error_str,
    },
    bytecode::{CompiledModule, disassemble},
    compile::{compile, dump_ast},
    diagnostics::{Diagnostic, Diagnostics, Severity},
    span::Span,
    vm::{
        Context, CoroutineState, ErrorKind, Heap, HeapData, HeapId, Local, Root, RootStack, RunError, RunResult,
        Scheduler, Scope, Value, ValueType,
    },
};
