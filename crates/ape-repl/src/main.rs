//! ape-repl - line-oriented REPL for the ape scripting engine
//!
//! Usage:
//!   ape-repl                 # start an interactive session
//!   ape-repl script.ape      # run a script then exit
//!
//! Commands:
//!   :quit, :q                # exit the session

use std::path::PathBuf;

use ape::{Engine, EngineConfig, ScriptError};
use clap::Parser as ClapParser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

#[derive(ClapParser)]
#[command(name = "ape-repl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Line-oriented REPL for the ape scripting engine", long_about = None)]
struct Args {
    /// ape source file to run non-interactively; omit for an interactive session
    file: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut engine = Engine::new(EngineConfig::builder().with_repl_mode(args.file.is_none()).build());

    if let Some(path) = args.file {
        match engine.execute_file(&path) {
            Ok(value) => println!("{value}"),
            Err(errors) => {
                print_errors(&errors);
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = run_repl(&mut engine) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Reads a line, feeds it to `Engine::execute`, prints the result or the
/// error list. Deliberately just a prompt loop: no IR panes, no vim
/// motions, no LSP completion — the façade's own end-to-end smoke test.
fn run_repl(engine: &mut Engine) -> rustyline::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("ape {} - type :quit to exit", env!("CARGO_PKG_VERSION"));

    loop {
        let line = match editor.readline("ape> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e),
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        editor.add_history_entry(trimmed)?;
        if trimmed == ":quit" || trimmed == ":q" {
            break;
        }

        match engine.execute(trimmed) {
            Ok(value) => println!("{value}"),
            Err(errors) => print_errors(&errors),
        }
    }

    Ok(())
}

fn print_errors(errors: &[ScriptError]) {
    for err in errors {
        eprintln!("{err}");
    }
}
