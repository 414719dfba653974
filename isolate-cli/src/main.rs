//! Isolate CLI
//!
//! Runs a command inside fresh Linux namespaces with remapped identities,
//! closed descriptors and bounded resource limits.

use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;
mod environ;
mod run;

use cli::Cli;
use isolate_core::ExitCode;

fn main() {
    // Parse command-line arguments
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.print() {
                Err(_) => ExitCode::IoErr,
                Ok(()) if e.use_stderr() => ExitCode::Usage,
                Ok(()) => ExitCode::Success,
            };
            process::exit(code.code());
        }
    };

    init_logging(cli.verbose);

    // Execute the command
    let code = match run::execute(cli) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("isolate: {e:#}");
            exit_code(&e).code()
        }
    };

    process::exit(code);
}

/// Setup logging based on verbosity; `RUST_LOG` wins when set
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(e: &anyhow::Error) -> ExitCode {
    e.downcast_ref::<isolate_core::Error>()
        .map_or(ExitCode::Software, isolate_core::Error::exit_code)
}
