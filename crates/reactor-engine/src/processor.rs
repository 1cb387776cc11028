//! The Processor: core scheduler, submission contract, and graceful
//! shutdown (spec.md §4.7).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reactor_core::JobQueue;
use serde_json::Value;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::builder;
use crate::config::ReactorConfig;
use crate::error::{HttpError, ReactorError};
use crate::inflight::SharedInflightRegistry;
use crate::lifecycle::{LifecycleManager, State};
use crate::pool::ConnectionPool;
use crate::reader::ResponseReader;
use crate::request::is_redirect_status;
use crate::response::Response;
use crate::task::{RecoveryPolicy, RequestTask};

struct Inner {
    process_id: String,
    lifecycle: LifecycleManager,
    config: ReactorConfig,
    pool: ConnectionPool,
    reader: ResponseReader,
    inflight: SharedInflightRegistry,
    job_queue: Arc<dyn JobQueue>,
    capacity: Arc<Semaphore>,
    active: Mutex<HashMap<String, Value>>,
    abandoned: Mutex<HashSet<String>>,
    submit_tx: mpsc::UnboundedSender<(RequestTask, OwnedSemaphorePermit)>,
}

/// The reactor scheduler (spec.md §4.7 "Processor (Reactor)").
///
/// Cheap to clone: every clone shares the same underlying state and
/// submission queue.
#[derive(Clone)]
pub struct Processor {
    inner: Arc<Inner>,
    reactor_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Processor {
    /// Build a processor in the `stopped` state. Call [`Processor::start`]
    /// to transition to `running` and begin the reactor loop.
    pub fn new(
        config: ReactorConfig,
        inflight: SharedInflightRegistry,
        job_queue: Arc<dyn JobQueue>,
        process_id: impl Into<String>,
    ) -> Result<Self, ReactorError> {
        config.validate()?;
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let pool = ConnectionPool::new(
            config.idle_connection_timeout,
            config.dns_cache_ttl,
            config.user_agent.clone(),
        );
        let reader = ResponseReader::new(config.max_response_size);
        let capacity = Arc::new(Semaphore::new(config.max_connections as usize));
        let inner = Arc::new(Inner {
            process_id: process_id.into(),
            lifecycle: LifecycleManager::new(),
            config,
            pool,
            reader,
            inflight,
            job_queue,
            capacity,
            active: Mutex::new(HashMap::new()),
            abandoned: Mutex::new(HashSet::new()),
            submit_tx,
        });
        let processor = Self {
            inner,
            reactor_handle: Arc::new(Mutex::new(None)),
        };
        processor.spawn_reactor_loop(submit_rx);
        Ok(processor)
    }

    fn spawn_reactor_loop(
        &self,
        submit_rx: mpsc::UnboundedReceiver<(RequestTask, OwnedSemaphorePermit)>,
    ) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(reactor_loop(inner, submit_rx));
        *self.reactor_handle.lock().unwrap() = Some(handle);
    }

    /// Transition `stopped -> running`, accepting submissions again.
    pub fn start(&self) -> Result<(), ReactorError> {
        self.inner.lifecycle.transition(State::Running)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        self.inner.lifecycle.state()
    }

    /// Current in-flight execution unit count.
    pub fn in_flight_count(&self) -> u32 {
        self.inner.config.max_connections - self.inner.capacity.available_permits() as u32
    }

    /// `submit(task)` per spec.md §4.7.1: validates lifecycle and capacity
    /// before queueing, returns the task id.
    ///
    /// Capacity is reserved here, atomically, by acquiring a semaphore
    /// permit sized to `max_connections` — not by comparing against a
    /// counter that only updates once the reactor loop dequeues the task.
    /// That makes `submit` safe to call concurrently from many producer
    /// threads: two racing callers can never both observe spare capacity
    /// and both succeed, since `try_acquire_owned` hands out each permit
    /// exactly once.
    pub fn submit(&self, mut task: RequestTask) -> Result<String, ReactorError> {
        match self.inner.lifecycle.state() {
            State::Stopped | State::Stopping => Err(ReactorError::NotRunningStopped),
            State::Draining => Err(ReactorError::NotRunningDraining),
            State::Running => {
                let permit = self
                    .inner
                    .capacity
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| ReactorError::MaxCapacity)?;
                task.mark_enqueued();
                let id = task.id().to_string();
                self.inner
                    .submit_tx
                    .send((task, permit))
                    .map_err(|_| ReactorError::NotRunningStopped)?;
                Ok(id)
            }
        }
    }

    /// `drain()` per spec.md §4.7.3: idempotent, rejects new submissions,
    /// lets in-flight units finish.
    pub fn drain(&self) -> Result<(), ReactorError> {
        if self.inner.lifecycle.is_draining() {
            return Ok(());
        }
        self.inner.lifecycle.transition(State::Draining)
    }

    /// True iff draining and no units are in-flight.
    pub fn is_drained(&self) -> bool {
        self.inner.lifecycle.is_draining() && self.in_flight_count() == 0
    }

    /// `stop(timeout)` per spec.md §4.7.4.
    ///
    /// Per the open question in spec.md §9, `stop` always takes an explicit
    /// timeout; [`Processor::stop_now`] is the separate zero-wait operation.
    pub async fn stop(&self, timeout: Duration) -> anyhow::Result<()> {
        if self.inner.lifecycle.is_stopped() {
            return Ok(());
        }
        self.inner.lifecycle.transition(State::Stopping)?;
        self.inner.lifecycle.signal_shutdown();

        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.reenqueue_stragglers().await;
        self.inner.pool.close_all();

        let handle = self.reactor_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.inner.lifecycle.transition(State::Stopped)?;
        Ok(())
    }

    /// `stop_now()`: equivalent to `stop(Duration::ZERO)`, abandoning every
    /// currently in-flight task immediately.
    pub async fn stop_now(&self) -> anyhow::Result<()> {
        self.stop(Duration::ZERO).await
    }

    async fn reenqueue_stragglers(&self) {
        let stragglers: Vec<(String, Value)> = {
            let active = self.inner.active.lock().unwrap();
            active.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        if stragglers.is_empty() {
            return;
        }
        {
            let mut abandoned = self.inner.abandoned.lock().unwrap();
            for (id, _) in &stragglers {
                abandoned.insert(id.clone());
            }
        }
        for (id, payload) in stragglers {
            if let Err(err) = self.inner.job_queue.enqueue(payload).await {
                tracing::warn!(task_id = %id, error = %err, "shutdown re-enqueue failed");
            }
        }
    }
}

async fn reactor_loop(
    inner: Arc<Inner>,
    mut submit_rx: mpsc::UnboundedReceiver<(RequestTask, OwnedSemaphorePermit)>,
) {
    let mut heartbeat_tick = tokio::time::interval(inner.config.heartbeat_interval);
    heartbeat_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            maybe_task = submit_rx.recv() => {
                match maybe_task {
                    Some((task, permit)) => spawn_execution_unit(inner.clone(), task, permit),
                    None => break,
                }
            }

            _ = heartbeat_tick.tick() => {
                run_heartbeat_and_gc(&inner).await;
            }

            _ = inner.lifecycle.wait_for_shutdown(), if submit_rx.is_empty() => {
                break;
            }
        }
    }
}

async fn run_heartbeat_and_gc(inner: &Arc<Inner>) {
    let evicted = inner.pool.close_idle(std::time::Instant::now());
    if evicted > 0 {
        tracing::debug!(evicted, "closed idle pooled connections");
    }

    let ids: Vec<String> = inner.active.lock().unwrap().keys().cloned().collect();
    if !ids.is_empty() {
        if let Err(err) = inner.inflight.update_heartbeats(&inner.process_id, &ids).await {
            tracing::warn!(error = %err, "heartbeat round failed");
        }
    }

    match inner.inflight.acquire_gc_lock(ReactorConfig::GC_LOCK_TTL).await {
        Ok(Some(token)) => {
            match inner
                .inflight
                .cleanup_orphans(inner.config.orphan_threshold, inner.job_queue.as_ref())
                .await
            {
                Ok(report) => {
                    if report.reenqueued > 0 || report.skipped > 0 {
                        tracing::info!(reenqueued = report.reenqueued, skipped = report.skipped, "orphan cleanup pass");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "orphan cleanup failed"),
            }
            if let Err(err) = inner.inflight.release_gc_lock(&token).await {
                tracing::warn!(error = %err, "failed to release gc lock");
            }
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "failed to acquire gc lock"),
    }
}

fn spawn_execution_unit(inner: Arc<Inner>, task: RequestTask, permit: OwnedSemaphorePermit) {
    tokio::spawn(async move {
        run_execution_unit(inner, task).await;
        drop(permit);
    });
}

async fn run_execution_unit(inner: Arc<Inner>, mut task: RequestTask) {
    let id = task.id().to_string();
    {
        let mut active = inner.active.lock().unwrap();
        active.insert(id.clone(), task.originating_job_payload().clone());
    }
    if let Err(err) = inner
        .inflight
        .register(&inner.process_id, &id, task.originating_job_payload())
        .await
    {
        tracing::warn!(task_id = %id, error = %err, "failed to register inflight entry");
    }

    task.mark_started();
    let continuation = run_request_chain(&inner, &mut task).await;

    if let Err(err) = inner.inflight.unregister(&inner.process_id, &id).await {
        tracing::warn!(task_id = %id, error = %err, "failed to unregister inflight entry");
    }
    inner.active.lock().unwrap().remove(&id);

    let was_abandoned = inner.abandoned.lock().unwrap().remove(&id);
    if was_abandoned {
        // The originating job was already re-enqueued by `stop(timeout)`;
        // the continuation this unit produced is discarded (spec.md §4.7.4).
        return;
    }

    if let Some(payload) = continuation {
        if let Err(err) = inner.job_queue.enqueue(payload).await {
            tracing::warn!(task_id = %id, error = %err, "continuation enqueue failed");
        }
    }
}

async fn run_request_chain(inner: &Arc<Inner>, task: &mut RequestTask) -> Option<Value> {
    loop {
        let client = match task.request().connect_timeout() {
            Some(connect_timeout) => inner.pool.one_off_client(connect_timeout),
            None => inner.pool.client_for(task.request().url()),
        };
        let client = match client {
            Ok(client) => client,
            Err(err) => {
                return Some(task.fail(HttpError {
                    kind: crate::error::HttpErrorKind::Unknown,
                    class_name: "PoolError".to_string(),
                    message: err.to_string(),
                    backtrace: Vec::new(),
                }));
            }
        };

        let timeout = task
            .request()
            .timeout()
            .unwrap_or(inner.config.default_request_timeout);
        let request = builder::build(&client, task.request(), inner.config.user_agent.as_deref());

        let send_result = tokio::time::timeout(timeout, request.send()).await;
        let response = match send_result {
            Err(_) => return Some(task.fail(HttpError::timeout(timeout.as_secs_f64()))),
            Ok(Err(err)) => return Some(task.fail(HttpError::from_reqwest(err))),
            Ok(Ok(response)) => response,
        };

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if is_redirect_status(status) && task.should_follow_redirect(status, location.as_deref()) {
            let location = location.expect("should_follow_redirect checked presence");
            let new_id = uuid::Uuid::new_v4().to_string();
            match task.for_redirect(new_id, status, &location) {
                Ok(next) => {
                    *task = next;
                    continue;
                }
                Err(err) => return Some(task.fail(err)),
            }
        }

        let protocol = Some(format!("{:?}", response.version()));
        let mut headers = crate::request::Headers::new();
        for (name, value) in response.headers().iter() {
            if let Ok(v) = value.to_str() {
                headers.append(name.as_str(), v);
            }
        }

        let raise_error_responses = task
            .request()
            .raise_error_responses()
            .unwrap_or(inner.config.raise_error_responses);
        if raise_error_responses && (400..600).contains(&status) {
            let _ = inner.reader.read(response).await;
            return Some(task.fail(HttpError::from_status(status)));
        }

        if let Some(content_type) = headers.get("content-type") {
            match crate::reader::charset_from_content_type(content_type) {
                Some(charset) => tracing::debug!(task_id = %task.id(), %charset, "decoded response charset"),
                None => tracing::debug!(task_id = %task.id(), "no recognizable charset; leaving body as raw bytes"),
            }
        }

        let body = match inner.reader.read(response).await {
            Ok(body) => body,
            Err(err) => return Some(task.fail(err)),
        };

        let duration = task.elapsed_secs();
        let response = Response {
            status,
            headers,
            body,
            duration_secs: duration,
            request_id: task.id().to_string(),
            url: task.request().url().clone(),
            method: task.request().method(),
            protocol,
            callback_args: task.callback_args().clone(),
        };
        return Some(task.complete(response));
    }
}
