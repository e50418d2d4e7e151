mod cli;
mod execute;

use std::io::IsTerminal;
use std::process::ExitCode;
use clap::Parser;
use tman::logging::init_logging;
use crate::cli::CLI;
use anyhow::Result;

fn main() -> Result<ExitCode> {
    let cli = CLI::parse();
    init_logging(cli.verbose, cli.log_file.as_deref())?;
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
    match execute::execute(cli)? {
        true => Ok(ExitCode::SUCCESS),
        false => Ok(ExitCode::FAILURE),
    }
}
