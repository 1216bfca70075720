use clap::Parser;
use underpass_cli::{cli::Cli, commands, error::AppError, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		handle_error(err);
		std::process::exit(1);
	}
}

fn handle_error(err: AppError) {
	eprintln!("error: {err}");
	if let Some(hint) = err.guidance() {
		eprintln!("hint: {hint}");
	}
}
