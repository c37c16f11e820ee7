#![forbid(unsafe_code)]

//! dwd — disk watchdog CLI entry point.

use clap::Parser;
use clap::error::ErrorKind;

mod cli_app;

fn main() {
    let args = match cli_app::Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version are successful exits; anything else gets the
            // usage hint clap already rendered, and exit code 1.
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    match cli_app::run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            disk_watchdog::logger::console::fatal(&e.to_string());
            std::process::exit(1);
        }
    }
}
