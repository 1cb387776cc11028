//! Fixed contracts for the external collaborators spec.md §1 places out of
//! scope: the job-framework integration that actually dispatches continuation
//! jobs. `reactor-engine` depends only on [`JobQueue`], never on a concrete
//! job framework, so swapping frameworks never touches the reactor.

use async_trait::async_trait;

/// Write-only handle onto the external job queue.
///
/// The reactor never reads from the queue — it only ever pushes: completion/
/// error/retry continuation payloads (§6) and, on graceful-shutdown timeout
/// or orphan cleanup, the re-enqueued originating job payload (§4.7.4,
/// §4.4). Both are "some job payload" from the reactor's point of view, so
/// one method covers both per spec.md §5 ("The job queue is write-only from
/// the reactor's perspective").
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Push a job payload (a continuation job, or a re-enqueued originating
    /// job) onto the queue.
    async fn enqueue(&self, payload: serde_json::Value) -> anyhow::Result<()>;
}
