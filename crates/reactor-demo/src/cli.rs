use clap::{Parser, ValueEnum};
use reqwest::Url;

use reactor_engine::ReactorConfig;

fn default_demo_url() -> Url {
    Url::parse("https://httpbin.org/get").expect("default demo URL must be valid")
}

/// The subset of HTTP methods the demo CLI can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliMethod {
    /// GET.
    Get,
    /// POST, with `--body`.
    Post,
}

/// A minimal driver that submits one request to a running reactor and prints
/// the continuation job it produces.
#[derive(Debug, Clone, Parser)]
#[command(name = "reactor-demo", version, about = "Async HTTP reactor demo")]
pub struct Cli {
    /// URL to request.
    #[arg(long, env = "REACTOR_DEMO_URL", default_value_t = default_demo_url())]
    pub url: Url,

    /// HTTP method to use.
    #[arg(long, env = "REACTOR_DEMO_METHOD", value_enum, default_value_t = CliMethod::Get)]
    pub method: CliMethod,

    /// Request body, only valid with `--method post`.
    #[arg(long, env = "REACTOR_DEMO_BODY")]
    pub body: Option<String>,

    /// Connection string for the external KV store backing the Inflight
    /// Registry.
    #[arg(long, env = "REACTOR_DEMO_REDIS_URL", default_value = "redis://127.0.0.1/")]
    pub redis_url: String,

    /// Cap on in-flight execution units.
    #[arg(long, env = "REACTOR_DEMO_MAX_CONNECTIONS", default_value_t = ReactorConfig::DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    /// Seconds to wait for drain before re-enqueueing on shutdown.
    #[arg(
        long,
        env = "REACTOR_DEMO_SHUTDOWN_TIMEOUT_SECS",
        default_value_t = ReactorConfig::DEFAULT_SHUTDOWN_TIMEOUT.as_secs()
    )]
    pub shutdown_timeout_secs: u64,

    /// Route 4xx/5xx responses to the error path instead of completion.
    #[arg(long, env = "REACTOR_DEMO_RAISE_ERROR_RESPONSES", default_value_t = false)]
    pub raise_error_responses: bool,
}
