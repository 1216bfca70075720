//! JavaScript evaluation methods for [`Page`].

use serde_json::{Value, json};
use underpass_runtime::{Error, Result};

use super::Page;

impl Page {
	async fn evaluate_inner(&self, expression: &str) -> Result<Value> {
		let result = self
			.send(
				"Runtime.evaluate",
				json!({
					"expression": expression,
					"returnByValue": true,
					"awaitPromise": true,
				}),
			)
			.await?;

		if let Some(details) = result.get("exceptionDetails") {
			let text = details
				.pointer("/exception/description")
				.and_then(Value::as_str)
				.or_else(|| details.get("text").and_then(Value::as_str))
				.unwrap_or("evaluation threw");
			return Err(Error::Evaluation(text.to_string()));
		}

		Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
	}

	/// Evaluates JavaScript in the page context, discarding the result.
	pub async fn evaluate(&self, expression: &str) -> Result<()> {
		self.evaluate_inner(expression).await?;
		Ok(())
	}

	/// Evaluates JavaScript and returns [`serde_json::Value`].
	pub async fn evaluate_json(&self, expression: &str) -> Result<Value> {
		self.evaluate_inner(expression).await
	}

	/// Evaluates JavaScript and deserializes the result to type `T`.
	///
	/// # Errors
	///
	/// Returns [`Error::Evaluation`] if the expression throws, or a JSON error
	/// if the result cannot be deserialized to `T`.
	pub async fn evaluate_typed<T: serde::de::DeserializeOwned>(&self, expression: &str) -> Result<T> {
		let value = self.evaluate_inner(expression).await?;
		serde_json::from_value(value).map_err(Into::into)
	}

	/// Liveness probe: a trivial evaluation that only checks the session is
	/// still answering.
	pub async fn probe(&self) -> Result<()> {
		let two: i64 = self.evaluate_typed("1 + 1").await?;
		if two != 2 {
			return Err(Error::ProtocolError("liveness probe returned nonsense".to_string()));
		}
		Ok(())
	}
}
