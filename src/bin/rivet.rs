//! Command line driver.
//!
//! Reads a program in AST text form, lowers it with the selected backend and writes the
//! assembly or LLVM IR text. `--run` executes assembly output on the reference emulator
//! instead and forwards the program's stdout and exit code.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use bumpalo::Bump;
use clap::Parser;
use log::{debug, error};

use rivet::ast_text::read_program;
use rivet::core::config::DEFAULT_GC_LIMIT;
use rivet::x64::emulator;
use rivet::{BackendKind, CompilationSession, CompilerConfig, Library};

#[derive(Parser, Debug)]
#[command(name = "rivet", version, about = "Lower typed AST text to x64 assembly or LLVM IR")]
struct Args {
    /// Input program in AST text form
    input: PathBuf,

    /// Output backend: asm or llvm
    #[arg(long, default_value_t = BackendKind::Asm)]
    backend: BackendKind,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Registrations before the first collection
    #[arg(long, default_value_t = DEFAULT_GC_LIMIT)]
    gc_limit: u64,

    /// Emit a comment before each lowered statement
    #[arg(long)]
    comments: bool,

    /// Print compilation statistics to stderr
    #[arg(long)]
    stats: bool,

    /// Execute the assembly on the emulator and print its output
    #[arg(long)]
    run: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match drive(&args) {
        Ok(code) => code,
        Err(message) => {
            error!("{message}");
            eprintln!("rivet: {message}");
            ExitCode::FAILURE
        }
    }
}

fn drive(args: &Args) -> Result<ExitCode, String> {
    let text = fs::read_to_string(&args.input)
        .map_err(|e| format!("failed to read {}: {}", args.input.display(), e))?;
    let library = Library::standard();
    let program = read_program(&text, &library)
        .map_err(|e| format!("{}:{}", args.input.display(), e))?;
    debug!("read {} statements from {}", program.body.len(), args.input.display());

    let config = CompilerConfig::default()
        .with_backend(args.backend)
        .with_gc_limit(args.gc_limit)
        .with_annotations(args.comments);

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let output = rivet::compile(&program, &library, &config, &session).map_err(|e| {
        if e.is_internal() {
            format!("internal compiler error: {e}")
        } else {
            format!("{}:{}", args.input.display(), e)
        }
    })?;

    if args.stats {
        eprint!("{}", session.stats());
    }

    if args.run {
        let module = output.as_asm().ok_or("--run needs the asm backend")?;
        let execution = emulator::run(module).map_err(|e| format!("runtime error: {e}"))?;
        print!("{}", execution.stdout);
        debug!("program exited with {} after {} steps", execution.exit_code, execution.steps);
        return Ok(ExitCode::from(execution.exit_code as u8));
    }

    let rendered = output.render();
    match &args.output {
        Some(path) => fs::write(path, rendered)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?,
        None => print!("{rendered}"),
    }
    Ok(ExitCode::SUCCESS)
}
