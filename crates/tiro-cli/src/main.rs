use std::{env, fs, process::ExitCode};

use tiro::{Context, Diagnostics, compile, disassemble, dump_ast, tracer::StderrTracer};

struct Options {
    file: String,
    dump_ast: bool,
    disassemble: bool,
    trace: bool,
    invoke: Option<String>,
}

fn parse_args() -> Result<Options, String> {
    let mut file = None;
    let mut dump = false;
    let mut disasm = false;
    let mut trace = false;
    let mut invoke = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dump-ast" => dump = true,
            "--disassemble" => disasm = true,
            "--trace" => trace = true,
            "--invoke" => {
                invoke = Some(args.next().ok_or("--invoke requires a function name")?);
            }
            "--help" | "-h" => {
                return Err(
                    "usage: tiro <file> [--dump-ast] [--disassemble] [--trace] [--invoke <function>]".to_owned(),
                );
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown option '{other}'"));
            }
            other => {
                if file.replace(other.to_owned()).is_some() {
                    return Err("only one source file may be given".to_owned());
                }
            }
        }
    }

    Ok(Options {
        file: file.ok_or("missing source file argument")?,
        dump_ast: dump,
        disassemble: disasm,
        trace,
        invoke,
    })
}

fn main() -> ExitCode {
    let options = match parse_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let source = match fs::read_to_string(&options.file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read '{}': {err}", options.file);
            return ExitCode::FAILURE;
        }
    };

    // The module is named after the file, without directories or extension.
    let module_name = std::path::Path::new(&options.file)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("main");

    let mut diagnostics = Diagnostics::new();
    if options.dump_ast {
        print!("{}", dump_ast(&source, &mut diagnostics));
        diagnostics.clear();
    }

    let Some(module) = compile(module_name, &source, &mut diagnostics) else {
        print!("{}", diagnostics.render(&options.file, &source));
        return ExitCode::FAILURE;
    };
    if diagnostics.has_messages() {
        print!("{}", diagnostics.render(&options.file, &source));
    }

    if options.disassemble {
        print!("{}", disassemble(&module));
    }

    let mut ctx = Context::new();
    if options.trace {
        ctx.set_tracer(Box::new(StderrTracer));
    }
    let loaded = match ctx.load(&module) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(function) = options.invoke {
        match ctx.call_export(loaded, &function, &[]) {
            Ok(value) => {
                println!("{}", ctx.render(value));
            }
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
