use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
	/// No credentials configured and no usable session to fall back on.
	#[error("no credentials configured and no usable session available")]
	ConfigMissing,

	/// The anti-automation challenge was not cleared within its time window.
	#[error("login challenge was not cleared")]
	ChallengeFailed,

	/// Every login attempt was exhausted.
	#[error("login failed after {attempts} attempts: {last_error}")]
	LoginFailed { attempts: u32, last_error: String },

	/// The live session stopped answering mid-call.
	#[error("session is no longer usable: {0}")]
	SessionDead(String),

	/// A matching response was never observed within the query window.
	#[error("no response to query within {ms}ms")]
	QueryTimeout { ms: u64 },

	/// The application never issued an interceptable request in the window.
	#[error("application issued no interceptable call to the target host")]
	NoInterceptableCall,

	/// A query is already in flight; calls must be serialized.
	#[error("another query is already in flight")]
	QueryInFlight,

	/// Challenge-solving service failure.
	#[error("challenge solver service error: {0}")]
	Solver(String),

	/// Configuration present but unusable.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	#[error(transparent)]
	Automation(#[from] underpass::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl AppError {
	/// Returns `true` when the failure means the current session must be
	/// replaced before another attempt can succeed.
	///
	/// Branches on error kinds only; remote message text was classified into
	/// kinds by the runtime adapter.
	pub fn should_replace_session(&self) -> bool {
		match self {
			AppError::SessionDead(_) | AppError::QueryTimeout { .. } => true,
			AppError::Automation(e) => e.is_session_dead() || e.is_timeout(),
			_ => false,
		}
	}

	/// Actionable hint shown alongside the error at the outermost boundary.
	pub fn guidance(&self) -> Option<&'static str> {
		match self {
			AppError::ConfigMissing => {
				Some("set UNDERPASS_IDENTIFIER, UNDERPASS_SECRET and UNDERPASS_ENDPOINT, or run `underpass login` on a machine with a configured profile")
			}
			AppError::ChallengeFailed | AppError::LoginFailed { .. } => {
				Some("if the challenge keeps failing, configure UNDERPASS_SOLVER_KEY or complete one login manually in the remote browser and retry")
			}
			AppError::NoInterceptableCall => {
				Some("the trigger view issued no API traffic; check --trigger-url points at a view that loads data")
			}
			_ => None,
		}
	}
}
