//! Per-request task state and finalization (spec.md §3 "Request Task", §4.6).

use std::time::{SystemTime, UNIX_EPOCH};

use reactor_core::CallbackArgs;
use serde_json::Value;

use crate::envelope::{self, ContinuationKind};
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;

/// What the job framework should do with a failed task: invoke the
/// registered error callback, or hand the failure back to the framework's
/// native retry machinery (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Dispatch an `"error"` continuation.
    Error,
    /// Dispatch a `"retry"` continuation; no callback runs.
    Retry,
}

/// The terminal outcome of a task, once known.
#[derive(Debug, Clone)]
pub enum TaskResult {
    /// No outcome yet.
    Pending,
    /// Completed successfully.
    Success(Response),
    /// Failed; carries the classified error.
    Error(HttpError),
}

/// One per live request (spec.md §3).
///
/// Mutated only by the single execution unit that processes it; finalized by
/// exactly one of `complete`/`fail`/shutdown re-enqueue.
pub struct RequestTask {
    id: String,
    request: Request,
    callback_class: String,
    callback_args: CallbackArgs,
    redirects: Vec<String>,
    max_redirects: u32,
    recovery_policy: RecoveryPolicy,
    originating_job_payload: Value,
    enqueued_at: Option<SystemTime>,
    started_at: Option<SystemTime>,
    completed_at: Option<SystemTime>,
    result: TaskResult,
}

impl RequestTask {
    /// Build a new task with id `id`, wrapping `request`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        request: Request,
        callback_class: String,
        callback_args: CallbackArgs,
        max_redirects: u32,
        recovery_policy: RecoveryPolicy,
        originating_job_payload: Value,
    ) -> Self {
        Self {
            id,
            request,
            callback_class,
            callback_args,
            redirects: Vec::new(),
            max_redirects,
            recovery_policy,
            originating_job_payload,
            enqueued_at: None,
            started_at: None,
            completed_at: None,
            result: TaskResult::Pending,
        }
    }

    /// The task's unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The wrapped request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The registered callback's identity.
    pub fn callback_class(&self) -> &str {
        &self.callback_class
    }

    /// The callback-args map to thread through to the completion/error
    /// continuation.
    pub fn callback_args(&self) -> &CallbackArgs {
        &self.callback_args
    }

    /// URLs traversed before this hop.
    pub fn redirects(&self) -> &[String] {
        &self.redirects
    }

    /// The max-redirects cap in force for this task.
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// The originating job payload, for re-enqueue on shutdown or orphan
    /// recovery.
    pub fn originating_job_payload(&self) -> &Value {
        &self.originating_job_payload
    }

    /// Stamp the `enqueued` timestamp (called by `submit`).
    pub fn mark_enqueued(&mut self) {
        self.enqueued_at = Some(SystemTime::now());
    }

    /// Stamp the `started` timestamp (called at the start of the execution
    /// unit).
    pub fn mark_started(&mut self) {
        self.started_at = Some(SystemTime::now());
    }

    /// Seconds elapsed since `started`, for response/error duration fields.
    pub fn elapsed_secs(&self) -> f64 {
        self.started_at
            .and_then(|start| SystemTime::now().duration_since(start).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Record a terminal error without building a continuation payload;
    /// used by the shutdown/orphan-recovery paths where no dispatch occurs.
    pub fn mark_abandoned(&mut self) {
        self.completed_at = Some(SystemTime::now());
    }

    /// Finalize this task with a successful response, returning the
    /// continuation job payload to enqueue.
    ///
    /// Exactly once: callers must not call `complete`/`fail` again after
    /// this returns.
    pub fn complete(&mut self, mut response: Response) -> Value {
        self.completed_at = Some(SystemTime::now());
        response.callback_args = self.callback_args.clone();
        let envelope_json = serde_json::to_value(envelope::encode_response(&response))
            .expect("ResponseEnvelope always serializes");
        self.result = TaskResult::Success(response);
        envelope::build_continuation_payload(
            &self.callback_class,
            envelope_json,
            ContinuationKind::Completion,
            None,
        )
    }

    /// Finalize this task with a failure, returning the continuation job
    /// payload to enqueue.
    ///
    /// Exactly once. When `recovery_policy` is [`RecoveryPolicy::Retry`],
    /// the payload carries the `"retry"` marker and the error envelope
    /// instead of dispatching a callback (spec.md §4.6).
    pub fn fail(&mut self, error: HttpError) -> Value {
        self.completed_at = Some(SystemTime::now());
        let duration = self.elapsed_secs();
        let error_envelope = envelope::encode_error(
            &error,
            duration,
            &self.id,
            self.request.url().as_str(),
            self.request.method().as_str(),
            self.callback_args.as_map().clone(),
        );
        let envelope_json =
            serde_json::to_value(&error_envelope).expect("ErrorEnvelope always serializes");
        let kind = match self.recovery_policy {
            RecoveryPolicy::Error => ContinuationKind::Error,
            RecoveryPolicy::Retry => ContinuationKind::Retry,
        };
        let error_ref = matches!(self.recovery_policy, RecoveryPolicy::Retry)
            .then_some(&error_envelope);
        self.result = TaskResult::Error(error);
        envelope::build_continuation_payload(&self.callback_class, envelope_json, kind, error_ref)
    }

    /// The current terminal result, if any.
    pub fn result(&self) -> &TaskResult {
        &self.result
    }

    /// Produce the redirect-transition task: a new id, a new [`Request`]
    /// derived via [`Request::for_redirect`], and the redirects chain
    /// extended with the current URL.
    ///
    /// Returns the redirect-exhausted error instead of a new task if
    /// following would exceed the cap.
    pub fn for_redirect(
        &self,
        new_id: String,
        status: u16,
        location: &str,
    ) -> Result<Self, HttpError> {
        if self.redirects.len() as u32 >= self.effective_max_redirects() {
            return Err(HttpError::redirects_exhausted(self.effective_max_redirects()));
        }
        let new_request = self
            .request
            .for_redirect(status, location)
            .map_err(|_| HttpError::redirects_exhausted(self.effective_max_redirects()))?;
        let mut redirects = self.redirects.clone();
        redirects.push(self.request.url().to_string());
        Ok(Self {
            id: new_id,
            request: new_request,
            callback_class: self.callback_class.clone(),
            callback_args: self.callback_args.clone(),
            redirects,
            max_redirects: self.max_redirects,
            recovery_policy: self.recovery_policy,
            originating_job_payload: self.originating_job_payload.clone(),
            enqueued_at: None,
            started_at: self.started_at,
            completed_at: None,
            result: TaskResult::Pending,
        })
    }

    fn effective_max_redirects(&self) -> u32 {
        self.request.max_redirects().unwrap_or(self.max_redirects)
    }

    /// Whether a redirect should be followed: status in the redirect set,
    /// a non-empty `location` header, and the cap greater than zero.
    pub fn should_follow_redirect(&self, status: u16, location: Option<&str>) -> bool {
        crate::request::is_redirect_status(status)
            && location.is_some_and(|l| !l.is_empty())
            && self.effective_max_redirects() > 0
    }
}

/// Milliseconds since the Unix epoch, used as Inflight Registry scores.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis() as i64
}
