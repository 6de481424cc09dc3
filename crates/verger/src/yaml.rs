//! YAML encoding for scenario and configuration files.
//!
//! Enum values use the map form at every nesting level
//! (`visible: { role: heading }`, `http: { url: ... }`, `fixed: { ms: 100 }`)
//! rather than YAML `!tags`, so files written by hand and files written by
//! [`to_string`] load the same way.

use crate::result::{VergerError, VergerResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml_ng::with::singleton_map_recursive;

/// Parse one YAML document
///
/// # Errors
///
/// Returns `Yaml` on malformed input or a shape mismatch
pub fn from_str<T: DeserializeOwned>(raw: &str) -> VergerResult<T> {
    let value = singleton_map_recursive::deserialize(serde_yaml_ng::Deserializer::from_str(raw))?;
    Ok(value)
}

/// Encode `value` as a YAML document
///
/// # Errors
///
/// Returns `Yaml` if the value cannot be represented
pub fn to_string<T: Serialize>(value: &T) -> VergerResult<String> {
    let mut out = Vec::with_capacity(256);
    let mut serializer = serde_yaml_ng::Serializer::new(&mut out);
    singleton_map_recursive::serialize(value, &mut serializer)?;
    String::from_utf8(out).map_err(|e| VergerError::config(format!("YAML output is not UTF-8: {e}")))
}
