//! Form input methods for [`Page`], built on script evaluation.

use serde_json::Value;
use underpass_runtime::{Error, Result};

use super::Page;

/// Quotes a string as a JavaScript string literal.
fn js_string(s: &str) -> String {
	serde_json::to_string(s).expect("strings always serialize")
}

impl Page {
	/// Fills an input or textarea and fires the framework-visible events.
	///
	/// Uses the native value setter so pages driven by virtual-DOM frameworks
	/// observe the change the same way they would a keystroke.
	pub async fn fill(&self, selector: &str, value: &str) -> Result<()> {
		let script = format!(
			r#"(() => {{
				const el = document.querySelector({sel});
				if (!el) return false;
				const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
				Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, {val});
				el.dispatchEvent(new Event('input', {{ bubbles: true }}));
				el.dispatchEvent(new Event('change', {{ bubbles: true }}));
				return true;
			}})()"#,
			sel = js_string(selector),
			val = js_string(value),
		);
		match self.evaluate_typed::<bool>(&script).await? {
			true => Ok(()),
			false => Err(Error::ElementNotFound(selector.to_string())),
		}
	}

	/// Clicks the first element matching `selector`.
	pub async fn click(&self, selector: &str) -> Result<()> {
		let script = format!(
			r#"(() => {{
				const el = document.querySelector({sel});
				if (!el) return false;
				el.click();
				return true;
			}})()"#,
			sel = js_string(selector),
		);
		match self.evaluate_typed::<bool>(&script).await? {
			true => Ok(()),
			false => Err(Error::ElementNotFound(selector.to_string())),
		}
	}

	/// Returns whether any element matches `selector`.
	pub async fn exists(&self, selector: &str) -> Result<bool> {
		let script = format!("document.querySelector({}) !== null", js_string(selector));
		self.evaluate_typed(&script).await
	}

	/// Reads the current value of an input or textarea.
	pub async fn input_value(&self, selector: &str) -> Result<String> {
		let script = format!(
			r#"(() => {{
				const el = document.querySelector({sel});
				return el ? el.value : null;
			}})()"#,
			sel = js_string(selector),
		);
		match self.evaluate_json(&script).await? {
			Value::String(value) => Ok(value),
			Value::Null => Err(Error::ElementNotFound(selector.to_string())),
			other => Err(Error::Evaluation(format!("unexpected value read: {other}"))),
		}
	}

	/// Returns `true` when the first match for `selector` exists and is not
	/// disabled.
	pub async fn is_enabled(&self, selector: &str) -> Result<bool> {
		let script = format!(
			r#"(() => {{
				const el = document.querySelector({sel});
				return !!el && !el.disabled;
			}})()"#,
			sel = js_string(selector),
		);
		self.evaluate_typed(&script).await
	}

	/// Reads an attribute from the first match for `selector`.
	pub async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>> {
		let script = format!(
			r#"(() => {{
				const el = document.querySelector({sel});
				return el ? el.getAttribute({attr}) : null;
			}})()"#,
			sel = js_string(selector),
			attr = js_string(name),
		);
		match self.evaluate_json(&script).await? {
			Value::String(value) => Ok(Some(value)),
			Value::Null => Ok(None),
			other => Err(Error::Evaluation(format!("unexpected attribute read: {other}"))),
		}
	}
}
