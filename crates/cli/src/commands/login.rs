//! `underpass login` - force a fresh authentication.

use std::path::PathBuf;

use crate::cli::LoginArgs;
use crate::config::Config;
use crate::error::Result;
use crate::session::SessionManager;

pub async fn execute(args: LoginArgs, state_file: Option<PathBuf>) -> Result<()> {
	let config = Config::new(&args.profile, &args.credentials, state_file);

	let mut manager = SessionManager::new(config);
	// Drop any persisted descriptor first so acquisition cannot reconnect.
	manager.store().clear()?;
	let live = manager.acquire().await?;

	println!("authenticated; session persisted for {}", live.endpoint());
	Ok(())
}
