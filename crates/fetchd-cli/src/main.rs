use fetchd_core::logging;

mod cli;

use crate::cli::Cli;

fn main() {
    logging::init_logging().expect("failed to initialize logging");

    if let Err(err) = Cli::run_from_args() {
        eprintln!("fetchd error: {:#}", err);
        std::process::exit(1);
    }
}

