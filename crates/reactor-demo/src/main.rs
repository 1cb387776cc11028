mod cli;
mod constants;
mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;
use tokio::sync::mpsc;

use reactor_core::JobQueue;
use reactor_engine::{
    Callback, ContinuationMiddleware, ErrorEnvelope, RecoveryPolicy, ReactorConfig,
    RedisInflightRegistry, Request, RequestTask, ResponseEnvelope, SharedInflightRegistry,
};

use crate::cli::{Cli, CliMethod};
use crate::constants::{DEMO_CALLBACK_CLASS, STATUS_TICK_SECS};
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

/// A [`JobQueue`] that forwards every enqueued payload onto an in-process
/// channel, standing in for the job framework the reactor is decoupled from.
struct ChannelJobQueue {
    tx: mpsc::UnboundedSender<Value>,
}

#[async_trait]
impl JobQueue for ChannelJobQueue {
    async fn enqueue(&self, payload: Value) -> anyhow::Result<()> {
        self.tx
            .send(payload)
            .map_err(|_| anyhow::anyhow!("demo job channel closed"))
    }
}

/// Prints the decoded Response/Error to stdout.
struct DemoCallback;

impl Callback for DemoCallback {
    fn on_completion(&self, envelope: &ResponseEnvelope) -> anyhow::Result<()> {
        println!(
            "completed: status={} request_id={} url={}",
            envelope.status, envelope.request_id, envelope.url
        );
        Ok(())
    }

    fn on_error(&self, envelope: &ErrorEnvelope) -> anyhow::Result<()> {
        println!(
            "errored: kind={:?} request_id={} message={}",
            envelope.error_type, envelope.request_id, envelope.message
        );
        Ok(())
    }
}

fn build_request(cli: &Cli) -> anyhow::Result<Request> {
    let body = match (&cli.method, &cli.body) {
        (CliMethod::Post, Some(body)) => Some(body.clone().into_bytes()),
        (CliMethod::Post, None) => None,
        (CliMethod::Get, Some(_)) => anyhow::bail!("--body is only valid with --method post"),
        (CliMethod::Get, None) => None,
    };
    let method = match cli.method {
        CliMethod::Get => reactor_engine::Method::Get,
        CliMethod::Post => reactor_engine::Method::Post,
    };
    Ok(Request::new(
        method,
        cli.url.clone(),
        reactor_engine::Headers::new(),
        body,
    )?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let inflight: SharedInflightRegistry = Arc::new(RedisInflightRegistry::new(&cli.redis_url)?);
    let (job_tx, mut job_rx) = mpsc::unbounded_channel();
    let job_queue: Arc<dyn JobQueue> = Arc::new(ChannelJobQueue { tx: job_tx });

    let mut config = ReactorConfig::new();
    config.max_connections = cli.max_connections;
    config.shutdown_timeout = Duration::from_secs(cli.shutdown_timeout_secs);
    config.raise_error_responses = cli.raise_error_responses;
    config.user_agent = Some(format!("reactor-demo/{}", env!("CARGO_PKG_VERSION")));

    let process_id = uuid::Uuid::new_v4().to_string();
    let processor = reactor_engine::Processor::new(config, inflight, job_queue, process_id)?;
    processor.start()?;

    let mut middleware = ContinuationMiddleware::new();
    middleware.register(DEMO_CALLBACK_CLASS, Arc::new(DemoCallback));

    let dispatch_task = tokio::spawn(async move {
        while let Some(payload) = job_rx.recv().await {
            match middleware.handle(&payload) {
                Ok(dispatch) => tracing::debug!(?dispatch, "continuation dispatched"),
                Err(err) => tracing::warn!(error = %err, "continuation dispatch failed"),
            }
        }
    });

    let request = build_request(&cli)?;
    let task_id = uuid::Uuid::new_v4().to_string();
    let task = RequestTask::new(
        task_id,
        request,
        DEMO_CALLBACK_CLASS.to_string(),
        reactor_core::CallbackArgs::new(),
        ReactorConfig::DEFAULT_MAX_REDIRECTS,
        RecoveryPolicy::Error,
        serde_json::json!({"demo": true}),
    );
    let submitted_id = processor.submit(task)?;
    println!("submitted task {submitted_id}");

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let mut status_tick = tokio::time::interval(Duration::from_secs(STATUS_TICK_SECS));
    let mut immediate_exit = false;

    loop {
        tokio::select! {
            ev = shutdown_rx.recv() => {
                match ev {
                    Some(ShutdownEvent::Graceful) => {
                        println!("stop requested: draining, press CTRL+C again to stop immediately");
                        processor.drain()?;
                        let timeout = Duration::from_secs(cli.shutdown_timeout_secs);
                        let processor = processor.clone();
                        tokio::spawn(async move {
                            if let Err(err) = processor.stop(timeout).await {
                                tracing::warn!(error = %err, "graceful stop failed");
                            }
                        });
                    }
                    Some(ShutdownEvent::Immediate) => {
                        println!("stop requested again: stopping immediately");
                        immediate_exit = true;
                        break;
                    }
                    None => {}
                }
            }
            _ = status_tick.tick() => {
                println!("in-flight={} state={:?}", processor.in_flight_count(), processor.state());
                if processor.is_drained() {
                    break;
                }
            }
        }
    }

    if immediate_exit {
        processor.stop_now().await?;
    }
    dispatch_task.abort();
    Ok(())
}
