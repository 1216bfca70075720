//! Command dispatch.

mod login;
mod run;
mod session;

use crate::cli::{Cli, Commands};
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Run(args) => run::execute(args, cli.state_file).await,
		Commands::Login(args) => login::execute(args, cli.state_file).await,
		Commands::Session(args) => session::execute(args, cli.state_file),
	}
}
