//! Deckhand CLI — declarative container stacks.

use clap::Parser;
use deckhand::cli::Cli;
use deckhand::telemetry;

fn main() {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json, telemetry::level_for(cli.verbose));
    if let Err(e) = deckhand::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
