#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The in-process asynchronous HTTP request reactor: a bounded-concurrency
//! processor that decouples worker-job concurrency from HTTP concurrency by
//! handing completed requests back to the job queue as continuation jobs.

mod builder;
mod config;
mod envelope;
mod error;
mod inflight;
mod lifecycle;
mod middleware;
mod pool;
mod reader;
mod request;
mod response;
mod task;

/// The reactor scheduler itself.
pub mod processor;

pub use config::ReactorConfig;
pub use envelope::{
    build_continuation_payload, decode_response_body, encode_error, encode_response,
    ContinuationKind, ErrorEnvelope, ResponseEnvelope,
};
pub use error::{HttpError, HttpErrorKind, ReactorError};
pub use inflight::{
    CleanupReport, InMemoryInflightRegistry, InflightRegistry, RedisInflightRegistry,
    SharedInflightRegistry,
};
pub use lifecycle::State as LifecycleState;
pub use middleware::{Callback, ContinuationMiddleware, Dispatch, MiddlewareError, RetrySignal};
pub use processor::Processor;
pub use request::{Headers, Method, Request};
pub use response::Response;
pub use task::{now_ms, RecoveryPolicy, RequestTask, TaskResult};
