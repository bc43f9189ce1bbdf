#![forbid(unsafe_code)]

//! sage — Storage-Sage CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("sage: {e}");
        std::process::exit(if e.is_config_error() { 2 } else { 1 });
    }
}
