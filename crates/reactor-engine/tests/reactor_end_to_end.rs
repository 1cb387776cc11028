//! End-to-end scenarios against a real (fake) HTTP origin and a real
//! [`Processor`], exercising the wire envelopes and the lifecycle rather
//! than any one module in isolation.

mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use reactor_engine::{
    decode_response_body, InMemoryInflightRegistry, Method, ReactorConfig, RecoveryPolicy,
    Request, RequestTask, ResponseEnvelope, SharedInflightRegistry,
};
use support::{recv_with_timeout, spawn_fake_server, ChannelJobQueue, ResponseSpec};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

fn make_processor(
    config: ReactorConfig,
) -> (reactor_engine::Processor, tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>) {
    let (queue, rx) = ChannelJobQueue::new();
    let inflight: SharedInflightRegistry = Arc::new(InMemoryInflightRegistry::new());
    let processor = reactor_engine::Processor::new(config, inflight, Arc::new(queue), "test-proc")
        .expect("valid config");
    processor.start().expect("stopped -> running");
    (processor, rx)
}

#[tokio::test]
async fn happy_path_get_completes_with_response_envelope() {
    init_tracing();
    let addr = spawn_fake_server(|req| {
        assert_eq!(req.method, "GET");
        ResponseSpec::ok(br#"{"ok":true}"#.to_vec())
    })
    .await;

    let (processor, mut rx) = make_processor(ReactorConfig::default());

    let url = format!("http://{addr}/users").parse().unwrap();
    let request = Request::new(Method::Get, url, reactor_engine::Headers::new(), None).unwrap();
    let task = RequestTask::new(
        "s1".to_string(),
        request,
        "TestCallback".to_string(),
        reactor_core::CallbackArgs::new(),
        ReactorConfig::DEFAULT_MAX_REDIRECTS,
        RecoveryPolicy::Error,
        json!({"job": "s1"}),
    );
    processor.submit(task).unwrap();

    let payload = recv_with_timeout(&mut rx).await;
    assert_eq!(payload["async_http_continuation"], "completion");
    assert_eq!(payload["args"][0]["status"], 200);

    let envelope: ResponseEnvelope = serde_json::from_value(payload["args"][0].clone()).unwrap();
    let decoded = decode_response_body(&envelope).unwrap().unwrap();
    assert_eq!(decoded, br#"{"ok":true}"#);
}

#[tokio::test]
async fn post_body_is_forwarded_byte_for_byte() {
    init_tracing();
    let addr = spawn_fake_server(|req| {
        assert_eq!(req.method, "POST");
        assert_eq!(req.body, b"hello=world");
        ResponseSpec::ok(req.body)
    })
    .await;

    let (processor, mut rx) = make_processor(ReactorConfig::default());

    let url = format!("http://{addr}/echo").parse().unwrap();
    let request = Request::new(
        Method::Post,
        url,
        reactor_engine::Headers::new(),
        Some(b"hello=world".to_vec()),
    )
    .unwrap();
    let task = RequestTask::new(
        "s2".to_string(),
        request,
        "TestCallback".to_string(),
        reactor_core::CallbackArgs::new(),
        ReactorConfig::DEFAULT_MAX_REDIRECTS,
        RecoveryPolicy::Error,
        json!({"job": "s2"}),
    );
    processor.submit(task).unwrap();

    let payload = recv_with_timeout(&mut rx).await;
    let envelope: ResponseEnvelope = serde_json::from_value(payload["args"][0].clone()).unwrap();
    let decoded = decode_response_body(&envelope).unwrap().unwrap();
    assert_eq!(decoded, b"hello=world");
}

#[tokio::test]
async fn slow_origin_produces_timeout_error_continuation() {
    init_tracing();
    let addr = spawn_fake_server(|_req| {
        ResponseSpec::ok(Vec::new()).with_delay(Duration::from_millis(300))
    })
    .await;

    let (processor, mut rx) = make_processor(ReactorConfig::default());

    let url = format!("http://{addr}/slow").parse().unwrap();
    let request = Request::new(Method::Get, url, reactor_engine::Headers::new(), None)
        .unwrap()
        .with_timeout(Duration::from_millis(50));
    let task = RequestTask::new(
        "s3".to_string(),
        request,
        "TestCallback".to_string(),
        reactor_core::CallbackArgs::new(),
        ReactorConfig::DEFAULT_MAX_REDIRECTS,
        RecoveryPolicy::Error,
        json!({"job": "s3"}),
    );
    processor.submit(task).unwrap();

    let payload = recv_with_timeout(&mut rx).await;
    assert_eq!(payload["async_http_continuation"], "error");
    assert_eq!(payload["args"][0]["error_type"], "timeout");
}

#[tokio::test]
async fn submit_rejects_once_max_connections_is_saturated() {
    init_tracing();
    let addr = spawn_fake_server(|_req| {
        ResponseSpec::ok(Vec::new()).with_delay(Duration::from_millis(500))
    })
    .await;

    let mut config = ReactorConfig::default();
    config.max_connections = 1;
    let (processor, mut _rx) = make_processor(config);

    let make_task = |id: &str| {
        let url = format!("http://{addr}/a").parse().unwrap();
        let request = Request::new(Method::Get, url, reactor_engine::Headers::new(), None).unwrap();
        RequestTask::new(
            id.to_string(),
            request,
            "TestCallback".to_string(),
            reactor_core::CallbackArgs::new(),
            ReactorConfig::DEFAULT_MAX_REDIRECTS,
            RecoveryPolicy::Error,
            json!({"job": id}),
        )
    };

    // Capacity is reserved synchronously inside `submit`, so the second call
    // is rejected immediately — no need to wait for the first task to reach
    // the reactor loop and actually start executing.
    processor.submit(make_task("first")).unwrap();
    let err = processor.submit(make_task("second"));
    assert!(matches!(err, Err(reactor_engine::ReactorError::MaxCapacity)));
}

#[tokio::test]
async fn concurrent_submit_never_exceeds_capacity() {
    init_tracing();
    let addr = spawn_fake_server(|_req| {
        ResponseSpec::ok(Vec::new()).with_delay(Duration::from_millis(500))
    })
    .await;

    let mut config = ReactorConfig::default();
    config.max_connections = 4;
    let (processor, mut _rx) = make_processor(config);

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let processor = processor.clone();
            let url = format!("http://{addr}/a");
            std::thread::spawn(move || {
                let url = url.parse().unwrap();
                let request =
                    Request::new(Method::Get, url, reactor_engine::Headers::new(), None).unwrap();
                let task = RequestTask::new(
                    format!("c{i}"),
                    request,
                    "TestCallback".to_string(),
                    reactor_core::CallbackArgs::new(),
                    ReactorConfig::DEFAULT_MAX_REDIRECTS,
                    RecoveryPolicy::Error,
                    json!({"job": i}),
                );
                processor.submit(task)
            })
        })
        .collect();

    let accepted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(
        accepted, 4,
        "exactly max_connections submissions should be accepted regardless of thread interleaving"
    );
}

#[tokio::test]
async fn redirect_302_is_followed_to_completion() {
    init_tracing();
    let addr = spawn_fake_server(|req| {
        if req.path == "/old" {
            ResponseSpec::redirect(302, "/new")
        } else {
            assert_eq!(req.path, "/new");
            ResponseSpec::ok(b"arrived".to_vec())
        }
    })
    .await;

    let (processor, mut rx) = make_processor(ReactorConfig::default());

    let url = format!("http://{addr}/old").parse().unwrap();
    let request = Request::new(Method::Get, url, reactor_engine::Headers::new(), None).unwrap();
    let task = RequestTask::new(
        "s5".to_string(),
        request,
        "TestCallback".to_string(),
        reactor_core::CallbackArgs::new(),
        ReactorConfig::DEFAULT_MAX_REDIRECTS,
        RecoveryPolicy::Error,
        json!({"job": "s5"}),
    );
    processor.submit(task).unwrap();

    let payload = recv_with_timeout(&mut rx).await;
    assert_eq!(payload["async_http_continuation"], "completion");
    assert_eq!(payload["args"][0]["status"], 200);
    assert!(payload["args"][0]["url"].as_str().unwrap().ends_with("/new"));
}

#[tokio::test]
async fn graceful_shutdown_reenqueues_straggling_task() {
    init_tracing();
    let addr = spawn_fake_server(|_req| {
        ResponseSpec::ok(Vec::new()).with_delay(Duration::from_secs(10))
    })
    .await;

    let (processor, mut rx) = make_processor(ReactorConfig::default());

    let url = format!("http://{addr}/slow").parse().unwrap();
    let request = Request::new(Method::Get, url, reactor_engine::Headers::new(), None).unwrap();
    let task = RequestTask::new(
        "s7".to_string(),
        request,
        "TestCallback".to_string(),
        reactor_core::CallbackArgs::new(),
        ReactorConfig::DEFAULT_MAX_REDIRECTS,
        RecoveryPolicy::Error,
        json!({"job": "s7", "original": true}),
    );
    processor.submit(task).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while processor.in_flight_count() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    processor.drain().unwrap();
    processor.stop(Duration::from_millis(50)).await.unwrap();

    let payload = recv_with_timeout(&mut rx).await;
    assert_eq!(payload["job"], "s7");
    assert_eq!(payload["original"], true);
    assert!(payload.get("async_http_continuation").is_none());
}
