//! `underpass session` - inspect or clear the persisted record.

use std::path::PathBuf;

use crate::cli::{SessionAction, SessionArgs};
use crate::config::default_state_file;
use crate::error::Result;
use crate::session::store::{SessionStore, now_ms};

pub fn execute(args: SessionArgs, state_file: Option<PathBuf>) -> Result<()> {
	let store = SessionStore::new(state_file.unwrap_or_else(default_state_file));

	match args.action {
		SessionAction::Status => match store.load() {
			Some(descriptor) => {
				println!(
					"session: {} (saved {}s ago, usable)",
					descriptor.endpoint,
					descriptor.age(now_ms()).as_secs()
				);
			}
			None => {
				println!("session: none (absent, malformed or past ttl)");
			}
		},
		SessionAction::Clear => {
			store.clear()?;
			println!("session record cleared");
		}
	}
	Ok(())
}
