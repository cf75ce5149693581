//! Payload deserialization.
//!
//! When the `tracing` feature is enabled, fields the payload types do not
//! capture are logged at `trace` level and failures are logged with the path of
//! the offending field, which helps detect upstream format changes.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize a pushed payload into its typed form.
///
/// # Example
///
/// ```ignore
/// let trade: Trade = deserialize_payload(json!({"e": "trade", "s": "BTCUSDT", "x": 1}))?;
/// // Logs: TRACE field "x" is not captured by Trade
/// ```
#[cfg(feature = "tracing")]
pub fn deserialize_payload<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    // Kept for the lookups below, which run after `value` is consumed.
    let original = value.clone();
    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        let path_result: Result<T, _> = serde_path_to_error::deserialize(&original);
        if let Err(path_err) = path_result {
            let path = path_err.path().to_string();
            tracing::error!(
                type_name = %type_name::<T>(),
                path = %path,
                value = %format_value(lookup_value(&original, &path)),
                error = %path_err.inner(),
                "payload deserialization failed"
            );
        }
    })?;

    for path in unknown_paths {
        tracing::trace!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %format_value(lookup_value(&original, &path)),
            "field is not captured by the payload type"
        );
    }

    Ok(result)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_payload<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Look up a value by a dotted path such as `data.k.o` or `[3].s`.
///
/// `?` segments (option wrappers) are skipped. Returns `None` when the path
/// does not exist.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    path.split(['.', '[', ']'])
        .filter(|segment| !segment.is_empty() && *segment != "?")
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "<unavailable>".to_owned(),
    }
}
