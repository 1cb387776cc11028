//! The closed error taxonomy of spec.md §7, plus the reactor's own
//! operational errors (lifecycle transitions, submission rejections,
//! registry failures).

use thiserror::Error;

/// The closed classification of HTTP/transport failures.
///
/// Every exception caught while executing a request is mapped to exactly one
/// of these kinds; anything unrecognized defaults to [`HttpErrorKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpErrorKind {
    /// The per-request or per-connect timeout elapsed.
    Timeout,
    /// TLS negotiation failed.
    Ssl,
    /// Connection refused/reset, host unreachable, broken pipe, or another
    /// low-level I/O failure.
    Connection,
    /// The [`crate::reader::ResponseReader`] hit a size-cap violation.
    ResponseTooLarge,
    /// HTTP protocol-level parse/framing error, including a redirect chain
    /// that exceeded the configured cap (there is no dedicated kind for
    /// that case; the closed taxonomy is exactly these six).
    Protocol,
    /// Any other exception.
    Unknown,
}

impl HttpErrorKind {
    /// Classify a [`reqwest::Error`] into the closed taxonomy.
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpErrorKind::Timeout
        } else if err.is_connect() {
            HttpErrorKind::Connection
        } else if err.is_decode() || err.is_body() {
            HttpErrorKind::Protocol
        } else if err
            .source()
            .map(|s| s.to_string().to_ascii_lowercase().contains("ssl")
                || s.to_string().to_ascii_lowercase().contains("tls"))
            .unwrap_or(false)
        {
            HttpErrorKind::Ssl
        } else {
            HttpErrorKind::Unknown
        }
    }
}

use std::error::Error as _;

/// A fully classified HTTP failure, ready to be attached to an
/// [`crate::envelope::ErrorEnvelope`] and sent down the error continuation
/// path.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HttpError {
    /// The closed error kind.
    pub kind: HttpErrorKind,
    /// The originating exception/type name, for cross-process transport.
    pub class_name: String,
    /// A human-readable message.
    pub message: String,
    /// Backtrace lines, best-effort (may be empty).
    pub backtrace: Vec<String>,
}

impl HttpError {
    /// Build an [`HttpError`] from a [`reqwest::Error`].
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = HttpErrorKind::classify(&err);
        Self {
            kind,
            class_name: "reqwest::Error".to_string(),
            message: err.to_string(),
            backtrace: Vec::new(),
        }
    }

    /// Build a [`HttpErrorKind::ResponseTooLarge`] error.
    pub fn response_too_large(limit: u64) -> Self {
        Self {
            kind: HttpErrorKind::ResponseTooLarge,
            class_name: "ResponseTooLarge".to_string(),
            message: format!("response body exceeded max_response_size ({limit} bytes)"),
            backtrace: Vec::new(),
        }
    }

    /// Build a redirect-chain-exhausted error, classified as
    /// [`HttpErrorKind::Protocol`] on the wire.
    pub fn redirects_exhausted(cap: u32) -> Self {
        Self {
            kind: HttpErrorKind::Protocol,
            class_name: "RedirectsExhausted".to_string(),
            message: format!("redirect chain exceeded max_redirects ({cap})"),
            backtrace: Vec::new(),
        }
    }

    /// Build a [`HttpErrorKind::Timeout`] error for a per-request timeout.
    pub fn timeout(secs: f64) -> Self {
        Self {
            kind: HttpErrorKind::Timeout,
            class_name: "Timeout".to_string(),
            message: format!("request timed out after {secs}s"),
            backtrace: Vec::new(),
        }
    }

    /// Build an HTTP-status error (`raise_error_responses` path, spec.md §7).
    pub fn from_status(status: u16) -> Self {
        let class_name = if (400..500).contains(&status) {
            "ClientError"
        } else {
            "ServerError"
        };
        Self {
            kind: HttpErrorKind::Unknown,
            class_name: class_name.to_string(),
            message: format!("HTTP request failed with status {status}"),
            backtrace: Vec::new(),
        }
    }
}

/// Errors returned by reactor operations themselves (not by the HTTP calls
/// they drive).
#[derive(Debug, Error)]
pub enum ReactorError {
    /// `submit` was called while the processor is `stopped`/`stopping`.
    #[error("processor is stopped")]
    NotRunningStopped,
    /// `submit` was called while the processor is `draining`.
    #[error("processor is draining")]
    NotRunningDraining,
    /// `submit` was called while the processor is already at max capacity.
    #[error("already at max capacity")]
    MaxCapacity,
    /// A lifecycle transition was requested that isn't in the legal set.
    #[error("illegal lifecycle transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// The state the transition was attempted from.
        from: crate::lifecycle::State,
        /// The state the transition targeted.
        to: crate::lifecycle::State,
    },
    /// The callback-args attached to a task failed validation.
    #[error(transparent)]
    CallbackArgs(#[from] reactor_core::CallbackArgsError),
    /// The request body violated an invariant (e.g. a body on a GET/DELETE).
    #[error("{0}")]
    InvalidRequest(String),
}
