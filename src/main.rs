mod cli;

use clap::Parser;
use colored::*;
use initializer::common::task_runner::TaskRunner;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();
    let debug = cli.debug;

    let result = match TaskRunner::new().block_on(cli::dispatch(cli)) {
        Ok(result) => result,
        Err(err) => Err(err.into()),
    };

    if let Err(err) = result {
        eprintln!("{} {}", "Error:".red().bold(), err);
        if debug {
            for cause in err.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
        }
        std::process::exit(1);
    }
}
