//! Small value types that cross the bridge.

use serde::{Deserialize, Serialize};

/// Clip region for a screenshot, also the shape of a `boundingBox` reply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotClip {
	/// X coordinate of clip region origin
	pub x: f64,
	/// Y coordinate of clip region origin
	pub y: f64,
	/// Width of clip region
	pub width: f64,
	/// Height of clip region
	pub height: f64,
}

/// Returns whether `value` counts as true for conditions evaluated remotely.
///
/// `null`, `false`, `0` and `""` are falsy; arrays and objects are always truthy.
pub fn is_truthy(value: &serde_json::Value) -> bool {
	use serde_json::Value;

	match value {
		Value::Null => false,
		Value::Bool(b) => *b,
		Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
		Value::String(s) => !s.is_empty(),
		Value::Array(_) | Value::Object(_) => true,
	}
}
