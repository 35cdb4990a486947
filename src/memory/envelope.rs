//! Uniform result envelope returned by every store operation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Success/data/error wrapper consumed by every external caller.
///
/// `success == true` implies `error` is `None`; `success == false` implies
/// `data` is `None`. The constructors are the only way the crate builds one,
/// so the invariant holds by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl Envelope {
    /// Successful result carrying a payload. A "not found" outcome is
    /// `ok(Value::Null)` -- absence is data, not failure.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed result carrying a description of what went wrong.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_has_no_error() {
        let env = Envelope::ok(json!({"key": "k"}));
        assert!(env.success);
        assert_eq!(env.data, Some(json!({"key": "k"})));
        assert!(env.error.is_none());
    }

    #[test]
    fn test_fail_has_no_data() {
        let env = Envelope::fail("Storage error: disk full");
        assert!(!env.success);
        assert!(env.data.is_none());
        assert_eq!(env.error.as_deref(), Some("Storage error: disk full"));
    }

    #[test]
    fn test_all_fields_serialized() {
        let env = Envelope::ok(Value::Null);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json, json!({"success": true, "data": null, "error": null}));
    }
}
