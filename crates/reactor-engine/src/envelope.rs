//! Wire-format envelopes for the continuation job payload (spec.md §6).

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HttpError, HttpErrorKind};
use crate::request::Headers;
use crate::response::Response;

const CLASS_TAG_RESPONSE: &str = "Response";
const CLASS_TAG_ERROR: &str = "Error";

/// The string-keyed Response envelope of spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    /// A fixed class tag so the consuming side can disambiguate envelope
    /// kinds ahead of a declared `class_name` (spec.md §4.8 note on class
    /// tags).
    pub class_tag: String,
    /// HTTP status code.
    pub status: u16,
    /// Lower-case keyed headers, flattened to one value per key (first-wins
    /// semantics; full multi-value transport is unnecessary for callbacks).
    pub headers: Map<String, Value>,
    /// Base64-encoded body bytes, or `null` for an empty body.
    pub body: Option<String>,
    /// Wall-clock duration of the request, in seconds.
    pub duration: f64,
    /// The originating task's id.
    pub request_id: String,
    /// Final response URL.
    pub url: String,
    /// Lower-case method string (`"get"`, `"post"`, ...).
    pub http_method: String,
    /// Negotiated protocol, if known.
    pub protocol: Option<String>,
    /// Callback-args copied through from the originating task.
    pub callback_args: Map<String, Value>,
}

/// The string-keyed Error envelope of spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    /// Class tag, mirroring [`ResponseEnvelope::class_tag`].
    pub class_tag: String,
    /// The originating exception/type name.
    pub class_name: String,
    /// Human-readable message.
    pub message: String,
    /// Backtrace lines, best-effort.
    pub backtrace: Vec<String>,
    /// One of the closed kinds (§7), as its wire string.
    pub error_type: HttpErrorKind,
    /// Wall-clock duration of the request, in seconds.
    pub duration: f64,
    /// The originating task's id.
    pub request_id: String,
    /// Request URL.
    pub url: String,
    /// Lower-case method string.
    pub http_method: String,
    /// Callback-args copied through from the originating task.
    pub callback_args: Map<String, Value>,
}

/// Encode a [`Response`] into its wire envelope.
pub fn encode_response(response: &Response) -> ResponseEnvelope {
    ResponseEnvelope {
        class_tag: CLASS_TAG_RESPONSE.to_string(),
        status: response.status,
        headers: headers_to_map(&response.headers),
        body: response
            .body
            .as_ref()
            .map(|b| base64::engine::general_purpose::STANDARD.encode(b)),
        duration: response.duration_secs,
        request_id: response.request_id.clone(),
        url: response.url.to_string(),
        http_method: response.method.as_str().to_string(),
        protocol: response.protocol.clone(),
        callback_args: response.callback_args.as_map().clone(),
    }
}

/// Decode a [`ResponseEnvelope`] back into its constituent fields, mainly
/// for use by consuming-side tests and the Continuation Middleware.
pub fn decode_response_body(envelope: &ResponseEnvelope) -> Result<Option<Vec<u8>>, HttpError> {
    match &envelope.body {
        None => Ok(None),
        Some(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| HttpError {
                kind: HttpErrorKind::Protocol,
                class_name: "EnvelopeDecodeError".to_string(),
                message: format!("invalid base64 body in response envelope: {e}"),
                backtrace: Vec::new(),
            }),
    }
}

/// Encode an [`HttpError`] plus request context into its wire envelope.
pub fn encode_error(
    error: &HttpError,
    duration: f64,
    request_id: &str,
    url: &str,
    http_method: &str,
    callback_args: Map<String, Value>,
) -> ErrorEnvelope {
    ErrorEnvelope {
        class_tag: CLASS_TAG_ERROR.to_string(),
        class_name: error.class_name.clone(),
        message: error.message.clone(),
        backtrace: error.backtrace.clone(),
        error_type: error.kind,
        duration,
        request_id: request_id.to_string(),
        url: url.to_string(),
        http_method: http_method.to_string(),
        callback_args,
    }
}

fn headers_to_map(headers: &Headers) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in headers.iter() {
        map.entry(key.to_string())
            .or_insert_with(|| Value::String(value.to_string()));
    }
    map
}

/// The `async_http_continuation` marker values (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinuationKind {
    /// Dispatch to after-completion callbacks.
    Completion,
    /// Dispatch to after-error callbacks.
    Error,
    /// Re-raise in the job framework's native retry machinery.
    Retry,
}

/// Build the full continuation job payload map for a completion or error
/// dispatch (spec.md §6): `{class, args: [envelope], async_http_continuation,
/// async_http_error?}`.
pub fn build_continuation_payload(
    callback_class: &str,
    envelope: Value,
    kind: ContinuationKind,
    error_envelope: Option<&ErrorEnvelope>,
) -> Value {
    let mut payload = Map::new();
    payload.insert("class".to_string(), Value::String(callback_class.to_string()));
    payload.insert("args".to_string(), Value::Array(vec![envelope]));
    payload.insert(
        "async_http_continuation".to_string(),
        serde_json::to_value(kind).expect("ContinuationKind always serializes"),
    );
    if let Some(err) = error_envelope {
        payload.insert(
            "async_http_error".to_string(),
            serde_json::to_value(err).expect("ErrorEnvelope always serializes"),
        );
    }
    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;
    use reactor_core::CallbackArgs;

    #[test]
    fn response_envelope_round_trips_through_json() {
        let response = Response {
            status: 200,
            headers: {
                let mut h = Headers::new();
                h.set("content-type", "application/json");
                h
            },
            body: Some(b"{\"ok\":true}".to_vec()),
            duration_secs: 0.125,
            request_id: "task-1".to_string(),
            url: "https://api.example.com/users".parse().unwrap(),
            method: Method::Get,
            protocol: Some("HTTP/1.1".to_string()),
            callback_args: CallbackArgs::new(),
        };
        let envelope = encode_response(&response);
        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: ResponseEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, decoded);
        let body = decode_response_body(&decoded).unwrap().unwrap();
        assert_eq!(body, b"{\"ok\":true}");
    }

    #[test]
    fn empty_body_encodes_to_null() {
        let response = Response {
            status: 204,
            headers: Headers::new(),
            body: None,
            duration_secs: 0.01,
            request_id: "task-2".to_string(),
            url: "https://api.example.com/users".parse().unwrap(),
            method: Method::Delete,
            protocol: None,
            callback_args: CallbackArgs::new(),
        };
        let envelope = encode_response(&response);
        assert!(envelope.body.is_none());
        assert!(decode_response_body(&envelope).unwrap().is_none());
    }

    #[test]
    fn continuation_payload_carries_error_marker_fields() {
        let error = HttpError::timeout(0.1);
        let err_envelope = encode_error(&error, 0.1, "task-3", "https://x.test/a", "get", Map::new());
        let payload = build_continuation_payload(
            "MyCallback",
            serde_json::to_value(&err_envelope).unwrap(),
            ContinuationKind::Retry,
            Some(&err_envelope),
        );
        assert_eq!(payload["async_http_continuation"], "retry");
        assert!(payload["async_http_error"].is_object());
    }
}
