//! `underpass run` - execute one query through the live session.

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::cli::RunArgs;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::executor::QueryExecutor;

pub async fn execute(args: RunArgs, state_file: Option<PathBuf>) -> Result<()> {
	let variables = parse_variables(&args.variables)?;
	let config = Config::new(&args.profile, &args.credentials, state_file);

	let mut executor = QueryExecutor::new(config);
	let data = executor.run(&args.query, variables).await?;

	println!("{}", serde_json::to_string_pretty(&data)?);
	Ok(())
}

fn parse_variables(raw: &str) -> Result<Map<String, Value>> {
	match serde_json::from_str::<Value>(raw)? {
		Value::Object(map) => Ok(map),
		other => Err(AppError::InvalidConfig(format!("--variables must be a JSON object, got {other}"))),
	}
}
