/*!
 * Serde utilities for common serialization/deserialization patterns.
 *
 * Reusable helpers shared by wire and configuration types so that loosely
 * typed input from front ends is handled consistently.
 */

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Deserialize an optional millisecond value that may be represented as a
/// number or a string.
///
/// Front ends frequently send timeouts as:
/// - Missing/null (returns None)
/// - Integer numbers
/// - Floating-point numbers (truncated)
/// - String representations of numbers
///
/// # Usage with serde
///
/// ```rust
/// use serde::Deserialize;
/// use cmdflow_core::utils::serde::deserialize_optional_millis;
///
/// #[derive(Deserialize)]
/// struct Request {
///     #[serde(default, deserialize_with = "deserialize_optional_millis")]
///     timeout_ms: Option<u64>,
/// }
///
/// let request: Request = serde_json::from_str(r#"{"timeout_ms": "1500"}"#).unwrap();
/// assert_eq!(request.timeout_ms, Some(1500));
/// ```
pub fn deserialize_optional_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(u) = n.as_u64() {
                Ok(Some(u))
            } else if let Some(f) = n.as_f64() {
                if f < 0.0 {
                    Err(D::Error::custom(format!("negative duration: {f}")))
                } else {
                    Ok(Some(f as u64))
                }
            } else {
                Err(D::Error::custom(format!("invalid duration: {n}")))
            }
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("cannot parse '{s}' as milliseconds"))),
        Some(other) => Err(D::Error::custom(format!(
            "expected number or string for milliseconds, got {other}"
        ))),
    }
}
