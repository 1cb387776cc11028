//! A minimal hand-rolled HTTP/1.1 responder used by the end-to-end tests in
//! this directory, standing in for a real origin server without pulling in a
//! mock-server crate (per SPEC_FULL.md's Test tooling section).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A parsed inbound request, just enough of HTTP/1.1 to drive test
/// assertions (method, path, headers, body).
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// What the fake origin should write back, with an optional artificial
/// delay before it does so (for exercising the per-request timeout).
pub struct ResponseSpec {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub delay: Option<Duration>,
}

impl ResponseSpec {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            reason: "OK",
            headers: Vec::new(),
            body: body.into(),
            delay: None,
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self {
            status,
            reason: "Found",
            headers: vec![("location".to_string(), location.to_string())],
            body: Vec::new(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Start a fake origin on an ephemeral port, dispatching every request to
/// `handler`. Runs until the test process exits; each connection is handled
/// on its own task and closed after one response (`connection: close`).
pub async fn spawn_fake_server<F>(handler: F) -> SocketAddr
where
    F: Fn(ParsedRequest) -> ResponseSpec + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                serve_one(socket, handler).await;
            });
        }
    });

    addr
}

async fn serve_one(mut socket: TcpStream, handler: Arc<dyn Fn(ParsedRequest) -> ResponseSpec + Send + Sync>) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let response = handler(request);
    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }
    write_response(&mut socket, &response).await;
}

async fn read_request(socket: &mut TcpStream) -> Option<ParsedRequest> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            if key == "content-length" {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((key, value));
        }
    }

    while buf.len() - header_end < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let available = buf.len() - header_end;
    let body = buf[header_end..header_end + content_length.min(available)].to_vec();

    Some(ParsedRequest { method, path, headers, body })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

async fn write_response(socket: &mut TcpStream, response: &ResponseSpec) {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\ncontent-length: {}\r\nconnection: close\r\n",
        response.status,
        response.reason,
        response.body.len()
    );
    for (key, value) in &response.headers {
        head.push_str(&format!("{key}: {value}\r\n"));
    }
    head.push_str("\r\n");
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&response.body).await;
    let _ = socket.shutdown().await;
}

/// A [`reactor_core::JobQueue`] backed by an unbounded channel, so tests can
/// `recv().await` the continuation/re-enqueue payloads the reactor produces.
pub struct ChannelJobQueue {
    tx: tokio::sync::mpsc::UnboundedSender<serde_json::Value>,
}

impl ChannelJobQueue {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl reactor_core::JobQueue for ChannelJobQueue {
    async fn enqueue(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        self.tx
            .send(payload)
            .map_err(|_| anyhow::anyhow!("test job channel closed"))
    }
}

/// `rx.recv()` with a generous bound, so a stuck reactor fails the test
/// instead of hanging the suite.
pub async fn recv_with_timeout(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>,
) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("continuation job was not enqueued in time")
        .expect("job channel closed unexpectedly")
}
