//! annforge CLI binary.

use clap::Parser;
use std::process;

use annforge::cli::{args::AnnforgeArgs, commands::execute_command};
use tracing_subscriber::EnvFilter;

fn main() {
    let args = AnnforgeArgs::parse();

    let level = match args.verbosity() {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    // The subscriber is scoped to this invocation rather than installed
    // globally; library consumers bring their own.
    let result = tracing::subscriber::with_default(subscriber, || execute_command(args));

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
