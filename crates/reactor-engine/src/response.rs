//! The Response type (spec.md §3) produced by a completed execution unit.

use reactor_core::CallbackArgs;

use crate::request::{Headers, Method};

/// A completed HTTP response, ready to be wrapped in a continuation envelope.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Lower-case keyed response headers.
    pub headers: Headers,
    /// The response body; `None` for an empty body (e.g. 204).
    pub body: Option<Vec<u8>>,
    /// Wall-clock duration of the request, in seconds.
    pub duration_secs: f64,
    /// The originating task's id.
    pub request_id: String,
    /// The final URL the response came from (after any redirects).
    pub url: reqwest::Url,
    /// The method of the final request in the chain.
    pub method: Method,
    /// The negotiated protocol, if known (e.g. "HTTP/1.1").
    pub protocol: Option<String>,
    /// Callback-args copied through from the originating task.
    pub callback_args: CallbackArgs,
}

impl Response {
    /// True if `status` falls in the 4xx range.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// True if `status` falls in the 5xx range.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}
