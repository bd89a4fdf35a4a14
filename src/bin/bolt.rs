//! The `bolt` command-line driver (§6).
//!
//! Assembles every input file, links the resulting modules (plus the
//! standard host library, unless `-x`), and runs the linked image —
//! stopping early if `-a`/`-l` say so. Parses flags and owns the
//! file-I/O streams that feed the lexer; everything past that is
//! `bolt::front`/`bolt::back`/`bolt::middle`, per spec.md §1's explicit
//! split between the driver (out of scope there) and the toolchain
//! (the library this binary calls into).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;
use thiserror::Error;

use bolt::back::link::{LinkConfig, LinkError, Linker};
use bolt::back::runtime::expose_std_lib;
use bolt::front::parse::ParseError;
use bolt::middle::vm::RuntimeError;

#[derive(Debug, Parser)]
#[command(name = "bolt", version, about = "Assembler, linker and virtual core for the Bolt VM")]
struct Args {
    /// Assembly source files.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Do not expose the standard host library.
    #[arg(short = 'x', long = "no-std-lib")]
    no_std_lib: bool,

    /// Stop after assembling every input.
    #[arg(short = 'a', long = "assemble-only")]
    assemble_only: bool,

    /// Stop after linking.
    #[arg(short = 'l', long = "link-only")]
    link_only: bool,

    /// Stack size, in words.
    #[arg(long = "stack-size", default_value_t = 1024)]
    stack_size: u32,

    /// Heap size, in words.
    #[arg(long = "heap-size", default_value_t = 1024)]
    heap_size: u32,

    /// Raise the log verbosity (-v, -vv, ...).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Error)]
enum BoltError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn run(args: &Args) -> Result<(), BoltError> {
    let mut linker = Linker::new();
    for path in &args.files {
        let text = std::fs::read_to_string(path)
            .map_err(|source| BoltError::Io { path: path.clone(), source })?;
        let module = bolt::front::assemble(&text)
            .map_err(|source| BoltError::Parse { path: path.clone(), source })?;
        info!("assembled {} ({} words)", path.display(), module.segment.len());
        linker.add_module(module);
    }

    if args.assemble_only {
        return Ok(());
    }

    if !args.no_std_lib {
        expose_std_lib(&mut linker);
    }

    let config = LinkConfig { stack_size: args.stack_size, heap_size: args.heap_size };
    let mut core = linker.link(config)?;
    info!("linked {} segment(s), {} hatch(es)", core.segments.len(), core.hatches.len());

    if args.link_only {
        return Ok(());
    }

    core.run()?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bolt: {e}");
            ExitCode::from(255)
        }
    }
}
