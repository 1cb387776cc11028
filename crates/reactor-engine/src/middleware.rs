//! Continuation job interception on the consuming side (spec.md §4.8).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::envelope::{ErrorEnvelope, ResponseEnvelope};

/// Registered after-completion or after-error handler.
pub trait Callback: Send + Sync {
    /// Invoked with the decoded Response envelope.
    fn on_completion(&self, envelope: &ResponseEnvelope) -> anyhow::Result<()> {
        let _ = envelope;
        Ok(())
    }

    /// Invoked with the decoded Error envelope.
    fn on_error(&self, envelope: &ErrorEnvelope) -> anyhow::Result<()> {
        let _ = envelope;
        Ok(())
    }
}

/// A job re-raised by the `"retry"` continuation path, for the job
/// framework's native retry machinery to pick up.
#[derive(Debug, Clone)]
pub struct RetrySignal {
    /// The decoded error that triggered the retry.
    pub error: ErrorEnvelope,
}

/// What the middleware decided to do with a job.
#[derive(Debug)]
pub enum Dispatch {
    /// Not an async-http continuation job; yield to downstream processing.
    PassThrough,
    /// Dispatched to after-completion callbacks.
    Completed,
    /// Dispatched to after-error callbacks.
    Errored,
    /// Re-raise this error in the worker frame; downstream dispatch is
    /// preempted.
    Retry(RetrySignal),
}

/// Unknown callback names are a hard error on the consuming side
/// (spec.md §9 "Callback identity as string").
#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError {
    /// `class` named a callback no handler was registered under.
    #[error("no callback registered for class {0:?}")]
    UnknownCallback(String),
    /// The job's `args[0]` envelope failed to decode.
    #[error("failed to decode continuation envelope: {0}")]
    Decode(#[from] serde_json::Error),
    /// The job carried a marker outside `{completion, error, retry}`.
    #[error("unrecognized async_http_continuation marker: {0:?}")]
    UnknownMarker(String),
}

/// Dispatches continuation jobs to registered callbacks by name.
///
/// Callbacks are invoked in registration order; any exception propagates,
/// causing the framework to treat the continuation job as failed
/// (spec.md §4.8 closing paragraph).
pub struct ContinuationMiddleware {
    callbacks: HashMap<String, Arc<dyn Callback>>,
}

impl ContinuationMiddleware {
    /// An empty middleware with no registered callbacks.
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
        }
    }

    /// Register a callback under `name`, overwriting any prior registration.
    pub fn register(&mut self, name: impl Into<String>, callback: Arc<dyn Callback>) {
        self.callbacks.insert(name.into(), callback);
    }

    /// Examine `job` and dispatch per spec.md §4.8.
    pub fn handle(&self, job: &Value) -> Result<Dispatch, MiddlewareError> {
        let marker = job.get("async_http_continuation").and_then(Value::as_str);
        let Some(marker) = marker else {
            return Ok(Dispatch::PassThrough);
        };

        let class = job
            .get("class")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match marker {
            "completion" => {
                let callback = self
                    .callbacks
                    .get(&class)
                    .cloned()
                    .ok_or_else(|| MiddlewareError::UnknownCallback(class.clone()))?;
                let envelope = decode_arg::<ResponseEnvelope>(job)?;
                callback
                    .on_completion(&envelope)
                    .map_err(|_| MiddlewareError::UnknownCallback(class))?;
                Ok(Dispatch::Completed)
            }
            "error" => {
                let callback = self
                    .callbacks
                    .get(&class)
                    .cloned()
                    .ok_or_else(|| MiddlewareError::UnknownCallback(class.clone()))?;
                let envelope = decode_arg::<ErrorEnvelope>(job)?;
                callback
                    .on_error(&envelope)
                    .map_err(|_| MiddlewareError::UnknownCallback(class))?;
                Ok(Dispatch::Errored)
            }
            "retry" => {
                // The retry path re-raises in the context of the original,
                // re-dispatched job — `class` is that job's class, which
                // need not be (and usually isn't) a registered callback.
                let error: ErrorEnvelope = serde_json::from_value(
                    job.get("async_http_error").cloned().unwrap_or(Value::Null),
                )?;
                Ok(Dispatch::Retry(RetrySignal { error }))
            }
            other => Err(MiddlewareError::UnknownMarker(other.to_string())),
        }
    }
}

impl Default for ContinuationMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_arg<T: serde::de::DeserializeOwned>(job: &Value) -> Result<T, serde_json::Error> {
    let arg = job
        .get("args")
        .and_then(Value::as_array)
        .and_then(|args| args.first())
        .cloned()
        .unwrap_or(Value::Null);
    serde_json::from_value(arg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{self, ContinuationKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCallback {
        completions: AtomicUsize,
        errors: AtomicUsize,
    }

    impl Callback for CountingCallback {
        fn on_completion(&self, _envelope: &ResponseEnvelope) -> anyhow::Result<()> {
            self.completions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_error(&self, _envelope: &ErrorEnvelope) -> anyhow::Result<()> {
            self.errors.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_response_envelope() -> ResponseEnvelope {
        serde_json::from_value(serde_json::to_value(envelope::encode_response(&crate::response::Response {
            status: 200,
            headers: crate::request::Headers::new(),
            body: None,
            duration_secs: 0.0,
            request_id: "t1".to_string(),
            url: "https://x.test/a".parse().unwrap(),
            method: crate::request::Method::Get,
            protocol: None,
            callback_args: reactor_core::CallbackArgs::new(),
        })).unwrap())
        .unwrap()
    }

    #[test]
    fn passes_through_jobs_without_marker() {
        let middleware = ContinuationMiddleware::new();
        let job = serde_json::json!({"class": "Whatever", "args": []});
        assert!(matches!(middleware.handle(&job).unwrap(), Dispatch::PassThrough));
    }

    #[test]
    fn dispatches_completion_to_registered_callback() {
        let mut middleware = ContinuationMiddleware::new();
        let callback = Arc::new(CountingCallback {
            completions: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        });
        middleware.register("MyCallback", callback.clone());

        let envelope = sample_response_envelope();
        let job = envelope::build_continuation_payload(
            "MyCallback",
            serde_json::to_value(&envelope).unwrap(),
            ContinuationKind::Completion,
            None,
        );
        let result = middleware.handle(&job).unwrap();
        assert!(matches!(result, Dispatch::Completed));
        assert_eq!(callback.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_callback_name_is_a_hard_error() {
        let middleware = ContinuationMiddleware::new();
        let envelope = sample_response_envelope();
        let job = envelope::build_continuation_payload(
            "NoSuchCallback",
            serde_json::to_value(&envelope).unwrap(),
            ContinuationKind::Completion,
            None,
        );
        assert!(matches!(
            middleware.handle(&job),
            Err(MiddlewareError::UnknownCallback(_))
        ));
    }

    #[test]
    fn retry_marker_preempts_downstream_and_carries_error() {
        let mut middleware = ContinuationMiddleware::new();
        middleware.register(
            "MyCallback",
            Arc::new(CountingCallback {
                completions: AtomicUsize::new(0),
                errors: AtomicUsize::new(0),
            }),
        );
        let error = crate::error::HttpError::timeout(0.1);
        let err_envelope = envelope::encode_error(&error, 0.1, "t1", "https://x.test/a", "get", serde_json::Map::new());
        let job = envelope::build_continuation_payload(
            "MyCallback",
            serde_json::to_value(&err_envelope).unwrap(),
            ContinuationKind::Retry,
            Some(&err_envelope),
        );
        match middleware.handle(&job).unwrap() {
            Dispatch::Retry(signal) => assert_eq!(signal.error.message, err_envelope.message),
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[test]
    fn retry_marker_does_not_require_a_registered_callback() {
        // The retry continuation's `class` is the original job's class, not
        // a completion/error callback name, so it need not be registered.
        let middleware = ContinuationMiddleware::new();
        let error = crate::error::HttpError::timeout(0.1);
        let err_envelope = envelope::encode_error(&error, 0.1, "t1", "https://x.test/a", "get", serde_json::Map::new());
        let job = envelope::build_continuation_payload(
            "SomeOriginalJobClass",
            serde_json::to_value(&err_envelope).unwrap(),
            ContinuationKind::Retry,
            Some(&err_envelope),
        );
        match middleware.handle(&job).unwrap() {
            Dispatch::Retry(signal) => assert_eq!(signal.error.message, err_envelope.message),
            other => panic!("expected Retry, got {other:?}"),
        }
    }
}
