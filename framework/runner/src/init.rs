use clap::Parser;

use crate::cli::CrankCli;

/// Initialise logging and parse the command line for a harness binary.
pub fn init() -> CrankCli {
    env_logger::init();

    CrankCli::parse()
}
