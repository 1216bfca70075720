use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::config::FillOrder;

/// Root CLI.
#[derive(Parser, Debug)]
#[command(name = "underpass")]
#[command(about = "Route queries to a defended API through a live browser session")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Path of the persisted session record.
	#[arg(long, global = true, env = "UNDERPASS_STATE_FILE", value_name = "FILE")]
	pub state_file: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Execute one query through the live session.
	Run(RunArgs),
	/// Force a fresh authentication and persist the new session.
	Login(LoginArgs),
	/// Inspect or clear the persisted session record.
	Session(SessionArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
	/// Query document text.
	#[arg(value_name = "QUERY")]
	pub query: String,

	/// JSON object of query variables.
	#[arg(long, value_name = "JSON", default_value = "{}")]
	pub variables: String,

	#[command(flatten)]
	pub profile: ProfileArgs,

	#[command(flatten)]
	pub credentials: CredentialArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoginArgs {
	#[command(flatten)]
	pub profile: ProfileArgs,

	#[command(flatten)]
	pub credentials: CredentialArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
	#[command(subcommand)]
	pub action: SessionAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionAction {
	/// Show the persisted session record and whether it is still usable.
	Status,
	/// Overwrite the persisted session record with an empty one.
	Clear,
}

/// Site-specific settings for the target application.
#[derive(Args, Debug, Clone)]
pub struct ProfileArgs {
	/// Login page URL.
	#[arg(long, env = "UNDERPASS_LOGIN_URL", value_name = "URL")]
	pub login_url: String,

	/// Glob matched against URLs inside the authenticated application.
	#[arg(long, env = "UNDERPASS_APP_URL", value_name = "GLOB")]
	pub app_url: String,

	/// Application view that reliably issues API traffic.
	#[arg(long, env = "UNDERPASS_TRIGGER_URL", value_name = "URL")]
	pub trigger_url: String,

	/// Protected API endpoint queries are routed to.
	#[arg(long, env = "UNDERPASS_API_URL", value_name = "URL")]
	pub api_url: Url,

	/// Login field fill ordering relative to the challenge widget.
	#[arg(long, env = "UNDERPASS_FILL_ORDER", value_enum, default_value = "secret-first")]
	pub fill_order: FillOrder,
}

/// Login and endpoint credentials; validated only when a fresh login runs.
#[derive(Args, Debug, Clone)]
pub struct CredentialArgs {
	/// Account identifier (email or username).
	#[arg(long, env = "UNDERPASS_IDENTIFIER")]
	pub identifier: Option<String>,

	/// Account secret.
	#[arg(long, env = "UNDERPASS_SECRET", hide_env_values = true)]
	pub secret: Option<String>,

	/// Remote browser automation endpoint (WebSocket debugger URL).
	#[arg(long, env = "UNDERPASS_ENDPOINT", value_name = "WS_URL")]
	pub endpoint: Option<String>,

	/// Challenge-solving service API key.
	#[arg(long, env = "UNDERPASS_SOLVER_KEY", hide_env_values = true)]
	pub solver_key: Option<String>,
}
