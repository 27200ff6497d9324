//! The quill launcher: links a demo program against the `io` native
//! module and runs it on the VM.

mod args;
mod demos;
mod error;

use args::QuillArgs;
use clap::Parser;
use quill_core::VmError;
use quill_vm::{stdlib, Application, ModuleSet};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing(directives: Option<&str>) {
    let filter = match directives {
        Some(d) => EnvFilter::new(d),
        None => EnvFilter::try_from_env("QUILL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn list_demos() {
    println!("available demos:");
    for (name, about) in demos::DEMOS {
        println!("  {:<12} {}", name, about);
    }
}

fn run_demo(name: &str, workers: usize) -> Result<i32, VmError> {
    let mut modules = vec![stdlib::io_module()?];
    match demos::build(name) {
        Some(built) => modules.extend(built.map_err(|e| {
            VmError::Load(quill_core::LoadError::Corrupt {
                module: name.to_string(),
                detail: e.to_string(),
            })
        })?),
        None => return Err(VmError::ModuleNotFound(name.to_string())),
    }

    let app = Application::new(ModuleSet::from_modules(modules), workers);
    app.spawn_main("demo", "main")?;
    app.run()
}

fn main() -> ExitCode {
    let args = QuillArgs::parse();
    init_tracing(args.log.as_deref());

    if args.list {
        list_demos();
        return ExitCode::from(error::EXIT_SUCCESS);
    }

    let Some(name) = args.demo.as_deref() else {
        eprintln!("quill: no program given (try --list)");
        return ExitCode::from(error::EXIT_USAGE_ERROR);
    };
    if !demos::is_known(name) {
        eprintln!("quill: unknown demo '{}' (try --list)", name);
        return ExitCode::from(error::EXIT_USAGE_ERROR);
    }

    let result = run_demo(name, args.workers);
    if let Err(e) = &result {
        error::report(e);
    }
    error::exit_code_for(&result)
}
