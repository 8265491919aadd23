//! The embedding shell.
//!
//! A thin, C-shaped boundary over the compiler and VM: status codes instead
//! of error types, opaque context and diagnostics handles, and an error-log
//! callback for message text. Every entry point is wrapped so internal
//! panics surface as [`Status::Internal`] instead of unwinding into the
//! embedder.

use std::panic::{AssertUnwindSafe, catch_unwind};

use strum::{Display, IntoStaticStr};

use crate::{
    compile::compile,
    diagnostics::Diagnostics,
    vm::{
        context::Context,
        heap::HeapData,
        objects::NativePointer,
        value::Value,
    },
};

/// Status codes returned by every entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum Status {
    Ok,
    BadArg,
    BadSource,
    ModuleExists,
    Alloc,
    Internal,
}

/// Static description of a status code.
#[must_use]
pub fn error_str(status: Status) -> &'static str {
    match status {
        Status::Ok => "success",
        Status::BadArg => "invalid argument",
        Status::BadSource => "the module source contains errors",
        Status::ModuleExists => "a module with that name already exists",
        Status::Alloc => "allocation failure",
        Status::Internal => "internal error",
    }
}

/// Error log callback: message text plus the userdata registered in the
/// settings.
pub type ErrorLogFn = fn(message: &str, userdata: usize);

/// Settings recognized by [`context_new`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Settings {
    pub error_log: Option<ErrorLogFn>,
    pub error_log_data: usize,
}

/// An embedder-facing context handle.
pub struct ApiContext {
    ctx: Context,
    settings: Settings,
}

impl ApiContext {
    fn log(&self, message: &str) {
        if let Some(log) = self.settings.error_log {
            log(message, self.settings.error_log_data);
        }
    }

    /// The underlying VM context, for embedders that outgrow the shell.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }
}

/// Collected diagnostics handle.
#[derive(Default)]
pub struct ApiDiagnostics {
    rendered: Vec<String>,
}

#[must_use]
pub fn context_new(settings: Option<Settings>) -> Box<ApiContext> {
    let settings = settings.unwrap_or_default();
    let mut ctx = Context::new();
    if settings.error_log_data != 0 {
        // Keep the embedder's userdata visible to the collector as an
        // opaque pointer object.
        let pointer = ctx.heap.allocate(HeapData::NativePointer(NativePointer {
            address: settings.error_log_data,
        }));
        ctx.add_global(Value::Ref(pointer));
    }
    Box::new(ApiContext { ctx, settings })
}

pub fn context_free(context: Box<ApiContext>) {
    drop(context);
}

/// Compiles and loads `module_source` as `module_name`, running the module
/// initializer. Compile diagnostics land in `diagnostics` when provided.
pub fn context_load(
    context: &mut ApiContext,
    module_name: &str,
    module_source: &str,
    diagnostics: Option<&mut ApiDiagnostics>,
) -> Status {
    if module_name.is_empty() {
        return Status::BadArg;
    }

    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut diag = Diagnostics::new();
        let compiled = compile(module_name, module_source, &mut diag);
        let rendered: Vec<String> = diag
            .render(module_name, module_source)
            .lines()
            .map(str::to_owned)
            .collect();
        (compiled, rendered)
    }));

    let (compiled, rendered) = match result {
        Ok(output) => output,
        Err(_) => {
            context.log("internal error while compiling the module");
            return Status::Internal;
        }
    };
    if let Some(diagnostics) = diagnostics {
        diagnostics.rendered.extend(rendered.iter().cloned());
    }

    let Some(compiled) = compiled else {
        for line in &rendered {
            context.log(line);
        }
        return Status::BadSource;
    };

    if context.ctx.find_module(module_name).is_some() {
        return Status::ModuleExists;
    }

    let loaded = catch_unwind(AssertUnwindSafe(|| context.ctx.load(&compiled)));
    match loaded {
        Ok(Ok(_)) => Status::Ok,
        Ok(Err(error)) => {
            context.log(&error.to_string());
            Status::BadSource
        }
        Err(_) => {
            context.log("internal error while loading the module");
            Status::Internal
        }
    }
}

#[must_use]
pub fn diagnostics_new() -> Box<ApiDiagnostics> {
    Box::new(ApiDiagnostics::default())
}

pub fn diagnostics_free(diagnostics: Box<ApiDiagnostics>) {
    drop(diagnostics);
}

pub fn diagnostics_clear(diagnostics: &mut ApiDiagnostics) {
    diagnostics.rendered.clear();
}

#[must_use]
pub fn diagnostics_has_messages(diagnostics: &ApiDiagnostics) -> bool {
    !diagnostics.rendered.is_empty()
}

pub fn diagnostics_print_stdout(diagnostics: &ApiDiagnostics) {
    for line in &diagnostics.rendered {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reports_bad_source() {
        let mut context = context_new(None);
        let mut diagnostics = diagnostics_new();
        let status = context_load(&mut context, "bad", "func broken(", Some(&mut diagnostics));
        assert_eq!(status, Status::BadSource);
        assert!(diagnostics_has_messages(&diagnostics));
        context_free(context);
    }

    #[test]
    fn load_rejects_duplicate_module_names() {
        let mut context = context_new(None);
        let source = "export func f() = 1;";
        assert_eq!(context_load(&mut context, "twice", source, None), Status::Ok);
        assert_eq!(context_load(&mut context, "twice", source, None), Status::ModuleExists);
    }

    #[test]
    fn error_log_receives_messages() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn log(_message: &str, _userdata: usize) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let mut context = context_new(Some(Settings {
            error_log: Some(log),
            error_log_data: 7,
        }));
        let status = context_load(&mut context, "bad", "var = ;", None);
        assert_eq!(status, Status::BadSource);
        assert!(CALLS.load(Ordering::SeqCst) > 0);
    }
}
