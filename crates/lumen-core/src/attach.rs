use serde_json::Value;

use crate::paths::PathTransform;

/// Arguments of a DAP `attach` request that the engine cares about.
///
/// Parsed leniently: wrong-typed fields fall back to their defaults rather
/// than failing the request, so a missing secret is reported as a rejected
/// attach instead of a protocol error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachArgs {
    /// Trimmed, non-empty shared secret, if one was supplied.
    pub secret: Option<String>,
    pub path_transforms: Vec<PathTransform>,
    /// Forward debuggee output as DAP `output` events.
    pub console_output: bool,
}

impl AttachArgs {
    pub fn from_value(arguments: &Value) -> Self {
        let secret = arguments
            .get("secret")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let path_transforms = PathTransform::list_from_value(arguments.get("pathTransforms"));
        let console_output = arguments
            .get("consoleOutput")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Self {
            secret,
            path_transforms,
            console_output,
        }
    }
}
