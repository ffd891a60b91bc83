use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use log::debug;

use homescript::diagnostic::{Diagnostic, Level};
use homescript::host::{CancelContext, FsExecutor};
use homescript::interpreter::DEFAULT_CALLSTACK_LIMIT;
use homescript::{compile_program, execute, Backend, CompileOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Tree,
    Vm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmitArg {
    Text,
    Json,
}

/// Compile and run Homescript programs.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Entry source file; sibling `.hms` files are importable modules.
    file: PathBuf,

    /// Execution backend.
    #[arg(long, value_enum, default_value = "tree")]
    backend: BackendArg,

    /// Only analyze; report diagnostics without running.
    #[arg(short, long)]
    check: bool,

    /// Diagnostics output format.
    #[arg(long, value_enum, default_value = "text")]
    emit: EmitArg,

    /// Abort execution after this many seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum call depth before a stack overflow error.
    #[arg(long, default_value_t = DEFAULT_CALLSTACK_LIMIT)]
    callstack_limit: usize,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    simple_logger::init_with_level(level).context("failed to initialize logging")?;

    let Some(entry) = args.file.file_stem().map(|s| s.to_string_lossy().to_string()) else {
        bail!("'{}' has no file stem", args.file.display());
    };
    let root = args
        .file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let executor = FsExecutor::new(root);
    let output = compile_program(&entry, &executor);
    report_diagnostics(&args, &output)?;

    if output.analyzed.has_errors() {
        std::process::exit(1);
    }
    if args.check {
        return Ok(());
    }

    let cancel = CancelContext::new();
    if let Some(seconds) = args.timeout {
        cancel.arm_deadline(Duration::from_secs(seconds));
    }

    let backend = match args.backend {
        BackendArg::Tree => Backend::Tree,
        BackendArg::Vm => Backend::Vm,
    };
    debug!("running '{entry}' on the {backend:?} backend");

    let result = execute(
        &output.analyzed,
        &executor,
        backend,
        cancel,
        args.callstack_limit,
    );

    if let Some(error) = &result.error {
        let rendered = Diagnostic::error(error.kind, error.message.clone(), error.span.clone());
        let source = output
            .sources
            .get(&error.span.filename)
            .map(String::as_str)
            .unwrap_or("");
        eprintln!("{}", rendered.display(source));
    }

    std::process::exit(result.exit_code.clamp(i32::MIN as i64, i32::MAX as i64) as i32);
}

fn report_diagnostics(args: &Cli, output: &CompileOutput) -> anyhow::Result<()> {
    if output.analyzed.diagnostics.is_empty() {
        return Ok(());
    }

    match args.emit {
        EmitArg::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output.analyzed.diagnostics)
                    .context("failed to serialize diagnostics")?
            );
        }
        EmitArg::Text => {
            for diagnostic in &output.analyzed.diagnostics {
                let source = output
                    .sources
                    .get(&diagnostic.span.filename)
                    .map(String::as_str)
                    .unwrap_or("");
                let rendered = diagnostic.display(source);
                if diagnostic.level == Level::Error {
                    eprintln!("{rendered}");
                } else {
                    println!("{rendered}");
                }
            }
        }
    }
    Ok(())
}
