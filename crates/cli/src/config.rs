//! Credentials and site profile, resolved once at startup.

use std::path::PathBuf;

use clap::ValueEnum;
use url::Url;

use crate::cli::{CredentialArgs, ProfileArgs};
use crate::error::{AppError, Result};

/// Credentials as configured; individual fields may be absent.
///
/// Presence is only enforced at the point a fresh login is needed.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
	pub identifier: Option<String>,
	pub secret: Option<String>,
	pub automation_endpoint: Option<String>,
	pub solver_key: Option<String>,
}

/// Credentials with everything a fresh login requires.
///
/// The solver key stays optional: without it the challenge falls back to
/// passive waiting.
#[derive(Debug, Clone)]
pub struct CompleteCredentials {
	pub identifier: String,
	pub secret: String,
	pub automation_endpoint: String,
	pub solver_key: Option<String>,
}

impl Credentials {
	/// Returns complete credentials, or [`AppError::ConfigMissing`].
	pub fn complete(&self) -> Result<CompleteCredentials> {
		match (&self.identifier, &self.secret, &self.automation_endpoint) {
			(Some(identifier), Some(secret), Some(endpoint)) => Ok(CompleteCredentials {
				identifier: identifier.clone(),
				secret: secret.clone(),
				automation_endpoint: endpoint.clone(),
				solver_key: self.solver_key.clone(),
			}),
			_ => Err(AppError::ConfigMissing),
		}
	}
}

/// Which login field is filled before the challenge is solved.
///
/// The challenge widget clears some form fields when it completes, and which
/// field survives differs across revisions of the login page, so the ordering
/// is configuration rather than code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FillOrder {
	/// Fill the secret before solving; fill the identifier after.
	#[default]
	SecretFirst,
	/// Fill both fields only after the challenge resolves.
	AfterChallenge,
}

/// Everything site-specific about the target application.
#[derive(Debug, Clone)]
pub struct SiteProfile {
	/// Login page URL.
	pub login_url: String,
	/// Glob matched against URLs inside the authenticated application.
	pub app_url_pattern: String,
	/// View that reliably issues API traffic when visited.
	pub trigger_url: String,
	/// Protected API endpoint queries are routed to.
	pub api_endpoint: Url,
	/// Login field fill ordering relative to the challenge.
	pub fill_order: FillOrder,
}

impl SiteProfile {
	pub fn from_args(args: &ProfileArgs) -> Self {
		Self {
			login_url: args.login_url.clone(),
			app_url_pattern: args.app_url.clone(),
			trigger_url: args.trigger_url.clone(),
			api_endpoint: args.api_url.clone(),
			fill_order: args.fill_order,
		}
	}
}

/// Resolved startup configuration.
#[derive(Debug, Clone)]
pub struct Config {
	pub credentials: Credentials,
	pub profile: SiteProfile,
	pub state_file: PathBuf,
}

impl Config {
	pub fn new(profile: &ProfileArgs, credentials: &CredentialArgs, state_file: Option<PathBuf>) -> Self {
		Self {
			credentials: Credentials {
				identifier: credentials.identifier.clone(),
				secret: credentials.secret.clone(),
				automation_endpoint: credentials.endpoint.clone(),
				solver_key: credentials.solver_key.clone(),
			},
			profile: SiteProfile::from_args(profile),
			state_file: state_file.unwrap_or_else(default_state_file),
		}
	}
}

/// Default location of the persisted session record.
pub fn default_state_file() -> PathBuf {
	dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("underpass").join("session.json")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn incomplete_credentials_are_config_missing() {
		let creds = Credentials {
			identifier: Some("user@example.com".into()),
			secret: None,
			automation_endpoint: Some("ws://127.0.0.1:9222/devtools/browser/x".into()),
			solver_key: None,
		};
		assert!(matches!(creds.complete(), Err(AppError::ConfigMissing)));
	}

	#[test]
	fn solver_key_is_not_required_for_completeness() {
		let creds = Credentials {
			identifier: Some("user@example.com".into()),
			secret: Some("hunter2".into()),
			automation_endpoint: Some("ws://127.0.0.1:9222/devtools/browser/x".into()),
			solver_key: None,
		};
		let complete = creds.complete().unwrap();
		assert!(complete.solver_key.is_none());
	}

	#[test]
	fn state_file_default_is_under_config_dir() {
		assert!(default_state_file().ends_with("underpass/session.json"));
	}
}
