//! Completions command

use crate::cli::args::{Cli, CompletionsArgs};
use crate::error::StrataResult;
use clap::CommandFactory;

pub fn completions(args: CompletionsArgs) -> StrataResult<()> {
    let mut command = Cli::command();
    clap_complete::generate(args.shell, &mut command, "strata", &mut std::io::stdout());
    Ok(())
}
