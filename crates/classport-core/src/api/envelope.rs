//! Response-shape normalization.
//!
//! Some portal endpoints return their payload directly; others wrap it in a
//! `{ success, message, code, data }` envelope, occasionally reporting a
//! logical failure inside an otherwise successful HTTP response. Both shapes
//! are resolved here, at one boundary, instead of by ad hoc probing at every
//! call site.

use serde::Deserialize;
use serde_json::Value;

use super::error::ApiError;

/// An enveloped response body.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub success: bool,
    pub message: Option<String>,
    pub code: Option<String>,
    pub data: Option<Value>,
}

/// A response body, classified by shape.
#[derive(Debug, Clone)]
pub enum Payload {
    /// The body is the payload itself.
    Direct(Value),
    /// The body is an envelope around the payload.
    Wrapped(Envelope),
}

impl Payload {
    /// Classify a raw response body.
    ///
    /// A JSON object carrying a boolean `success` field is treated as an
    /// envelope; anything else is a direct payload. Non-JSON bodies pass
    /// through as strings and an empty body becomes `null`.
    pub fn parse(body: &str) -> Self {
        let value = raw_value(body);
        let Some(obj) = value.as_object() else {
            return Payload::Direct(value);
        };
        let Some(success) = obj.get("success").and_then(Value::as_bool) else {
            return Payload::Direct(value);
        };
        Payload::Wrapped(Envelope {
            success,
            message: obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            code: obj.get("code").map(code_string),
            data: obj.get("data").cloned(),
        })
    }

    /// Resolve into the value handed back to callers.
    ///
    /// A wrapped body reporting `success: false` becomes an application
    /// failure carrying the embedded message and code; a successful envelope
    /// unwraps to its `data` field.
    pub fn into_result(self) -> Result<Value, ApiError> {
        match self {
            Payload::Direct(value) => Ok(value),
            Payload::Wrapped(envelope) if envelope.success => {
                Ok(envelope.data.unwrap_or(Value::Null))
            }
            Payload::Wrapped(envelope) => Err(ApiError::Application {
                message: envelope
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
                code: envelope.code,
            }),
        }
    }
}

/// Parse a body as JSON, falling back to a string value for non-JSON bodies.
pub(crate) fn raw_value(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

/// Error codes arrive as strings or numbers depending on the endpoint.
fn code_string(value: &Value) -> String {
    match value.as_str() {
        Some(code) => code.to_string(),
        None => value.to_string(),
    }
}

/// A freshly issued credential pair as returned by the renewal endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenGrant {
    /// Extract a grant from either response shape.
    pub fn from_payload(payload: Payload) -> Result<Self, ApiError> {
        let value = payload.into_result()?;
        serde_json::from_value(value)
            .map_err(|err| ApiError::InvalidResponse(format!("token grant: {}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_payload_passes_through() {
        let payload = Payload::parse(r#"[{"id": 1}, {"id": 2}]"#);
        let value = payload.into_result().expect("direct payload");
        assert_eq!(value, json!([{"id": 1}, {"id": 2}]));
    }

    #[test]
    fn test_object_without_success_is_direct() {
        let payload = Payload::parse(r#"{"items": [], "total": 0}"#);
        let value = payload.into_result().expect("direct payload");
        assert_eq!(value, json!({"items": [], "total": 0}));
    }

    #[test]
    fn test_wrapped_failure_reclassified() {
        let payload =
            Payload::parse(r#"{"success": false, "message": "score sheet locked", "code": "E42"}"#);
        match payload.into_result() {
            Err(ApiError::Application { message, code }) => {
                assert_eq!(message, "score sheet locked");
                assert_eq!(code.as_deref(), Some("E42"));
            }
            other => panic!("expected application failure, got {:?}", other),
        }
    }

    #[test]
    fn test_wrapped_failure_numeric_code() {
        let payload = Payload::parse(r#"{"success": false, "code": 4201}"#);
        match payload.into_result() {
            Err(ApiError::Application { message, code }) => {
                assert_eq!(message, "request failed");
                assert_eq!(code.as_deref(), Some("4201"));
            }
            other => panic!("expected application failure, got {:?}", other),
        }
    }

    #[test]
    fn test_wrapped_success_unwraps_data() {
        let payload = Payload::parse(r#"{"success": true, "data": {"score": 87}}"#);
        let value = payload.into_result().expect("wrapped success");
        assert_eq!(value, json!({"score": 87}));
    }

    #[test]
    fn test_wrapped_success_without_data_is_null() {
        let payload = Payload::parse(r#"{"success": true}"#);
        let value = payload.into_result().expect("wrapped success");
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_non_json_body_becomes_string() {
        let payload = Payload::parse("OK");
        let value = payload.into_result().expect("plain text body");
        assert_eq!(value, json!("OK"));
    }

    #[test]
    fn test_empty_body_becomes_null() {
        let payload = Payload::parse("  ");
        let value = payload.into_result().expect("empty body");
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_token_grant_direct() {
        let payload = Payload::parse(r#"{"access_token": "A2", "refresh_token": "R2"}"#);
        let grant = TokenGrant::from_payload(payload).expect("direct grant");
        assert_eq!(grant.access_token, "A2");
        assert_eq!(grant.refresh_token, "R2");
    }

    #[test]
    fn test_token_grant_wrapped() {
        let payload = Payload::parse(
            r#"{"success": true, "data": {"access_token": "A2", "refresh_token": "R2"}}"#,
        );
        let grant = TokenGrant::from_payload(payload).expect("wrapped grant");
        assert_eq!(grant.access_token, "A2");
        assert_eq!(grant.refresh_token, "R2");
    }

    #[test]
    fn test_token_grant_wrapped_failure() {
        let payload = Payload::parse(r#"{"success": false, "message": "refresh token revoked"}"#);
        assert!(matches!(
            TokenGrant::from_payload(payload),
            Err(ApiError::Application { .. })
        ));
    }

    #[test]
    fn test_token_grant_malformed() {
        let payload = Payload::parse(r#"{"access_token": "A2"}"#);
        assert!(matches!(
            TokenGrant::from_payload(payload),
            Err(ApiError::InvalidResponse(_))
        ));
    }
}
