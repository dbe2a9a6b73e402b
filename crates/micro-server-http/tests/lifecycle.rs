//! End-to-end lifecycle tests against a real listener.
//!
//! Each test binds `127.0.0.1:0`, serves a small router and drives it with
//! `reqwest`, checking request handling together with the shutdown
//! guarantees: cancellation stops the server, in-flight work gets at most the
//! graceful timeout, and the listener is gone afterwards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use micro_server_http::{
    LifecycleState, ListenAddr, ReadinessCheck, Server, ServerError, ServerOptions, ServerResult,
};
use micro_server_middleware::{BoxHandler, Request, Response, ResponseExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Running {
    server: Arc<Server>,
    cancel: CancellationToken,
    handle: JoinHandle<ServerResult<()>>,
}

impl Running {
    fn url(&self, path: &str) -> String {
        match self.server.local_addr() {
            ListenAddr::Tcp(addr) => format!("http://{addr}{path}"),
            ListenAddr::Pipe(path) => panic!("unexpected local channel {path}"),
        }
    }

    async fn stop(self) -> ServerResult<()> {
        self.cancel.cancel();
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("server should stop")
            .expect("server task should not panic")
    }
}

async fn start(server: Server) -> Running {
    let server = Arc::new(server);
    let cancel = CancellationToken::new();
    let mut states = server.subscribe();

    let handle = {
        let server = Arc::clone(&server);
        let cancel = cancel.clone();
        tokio::spawn(async move { server.run(&cancel).await })
    };

    tokio::time::timeout(WAIT, states.wait_for(|s| *s == LifecycleState::Running))
        .await
        .expect("server should start")
        .expect("state channel open");

    Running {
        server,
        cancel,
        handle,
    }
}

fn echo_method() -> BoxHandler {
    Arc::new(|request: Request| async move {
        Response::text(StatusCode::OK, request.method().to_string())
    })
}

fn options(graceful_timeout: Duration) -> ServerOptions {
    ServerOptions::builder()
        .graceful_timeout(graceful_timeout)
        .build()
}

#[tokio::test]
async fn test_echo_then_cancel() {
    let mut server = Server::new_base(":0", ServerOptions::default()).unwrap();
    server.router_mut().handle("/x", echo_method());
    let running = start(server).await;

    let body = reqwest::get(running.url("/x")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "GET");

    let server = Arc::clone(&running.server);
    let started = Instant::now();
    running.stop().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_slow_request_is_cut_at_graceful_timeout() {
    let graceful = Duration::from_millis(50);
    let mut server = Server::new_base("127.0.0.1:0", options(graceful)).unwrap();

    let entered = Arc::new(Notify::new());
    let signal = Arc::clone(&entered);
    server.router_mut().handle(
        "/slow",
        Arc::new(move |_request: Request| {
            let signal = Arc::clone(&signal);
            async move {
                signal.notify_one();
                tokio::time::sleep(Duration::from_secs(5)).await;
                Response::text(StatusCode::OK, "late")
            }
        }),
    );
    let running = start(server).await;

    let client = tokio::spawn(reqwest::get(running.url("/slow")));
    tokio::time::timeout(WAIT, entered.notified())
        .await
        .expect("handler should start");

    let started = Instant::now();
    running.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= graceful, "stopped after {elapsed:?}");
    assert!(elapsed < graceful + Duration::from_secs(1), "stopped after {elapsed:?}");

    let response = tokio::time::timeout(WAIT, client).await.unwrap().unwrap();
    assert!(response.is_err(), "slow request should be terminated");
}

#[tokio::test]
async fn test_in_flight_request_completes_within_timeout() {
    let mut server = Server::new_base("127.0.0.1:0", options(Duration::from_secs(2))).unwrap();

    let entered = Arc::new(Notify::new());
    let signal = Arc::clone(&entered);
    server.router_mut().handle(
        "/work",
        Arc::new(move |_request: Request| {
            let signal = Arc::clone(&signal);
            async move {
                signal.notify_one();
                tokio::time::sleep(Duration::from_millis(100)).await;
                Response::text(StatusCode::OK, "done")
            }
        }),
    );
    let running = start(server).await;

    let client = tokio::spawn(reqwest::get(running.url("/work")));
    tokio::time::timeout(WAIT, entered.notified())
        .await
        .expect("handler should start");

    running.stop().await.unwrap();

    let response = client.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "done");
}

#[tokio::test]
async fn test_listener_closed_after_stop() {
    let server = Server::new_base("127.0.0.1:0", ServerOptions::default()).unwrap();
    let running = start(server).await;
    let ListenAddr::Tcp(addr) = running.server.local_addr().clone() else {
        panic!("expected TCP address");
    };

    running.stop().await.unwrap();

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_second_run_is_rejected() {
    let server = Server::new_base("127.0.0.1:0", ServerOptions::default()).unwrap();
    let running = start(server).await;

    let second = running.server.run(&CancellationToken::new()).await;
    assert!(matches!(second, Err(ServerError::AlreadyRunning)));
    assert_eq!(running.server.state(), LifecycleState::Running);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_while_running() {
    let server = Server::new_base("127.0.0.1:0", ServerOptions::default()).unwrap();
    let running = start(server).await;

    tokio::time::timeout(WAIT, running.server.shutdown())
        .await
        .expect("shutdown should complete")
        .unwrap();
    assert_eq!(running.server.state(), LifecycleState::Stopped);

    let result = tokio::time::timeout(WAIT, running.handle).await.unwrap().unwrap();
    assert!(result.is_ok());

    running.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_monitoring_routes() {
    let readiness = ReadinessCheck::new();
    let server = Server::new_monitoring(
        "127.0.0.1:0",
        ServerOptions::default(),
        None,
        Some(readiness.boxed()),
        None,
    )
    .unwrap();
    let running = start(server).await;
    let client = reqwest::Client::new();

    let response = client
        .get(running.url("/healthz/liveness"))
        .header("origin", "https://ui.example")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "https://ui.example"
    );
    assert_eq!(response.text().await.unwrap(), "ok");

    let response = client.get(running.url("/healthz/readiness")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    readiness.set_ready(false);
    let response = client.get(running.url("/healthz/readiness")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = client
        .post(running.url("/healthz/liveness"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = client.get(running.url("/metrics")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_preflight_answered_before_routing() {
    let mut server = Server::new_base("127.0.0.1:0", ServerOptions::default()).unwrap();
    server
        .router_mut()
        .handle("/records/{id}", echo_method())
        .methods([Method::DELETE]);
    let running = start(server).await;

    let response = reqwest::Client::new()
        .request(Method::OPTIONS, running.url("/records/9"))
        .header("origin", "https://ui.example")
        .header("access-control-request-method", "DELETE")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers().get("access-control-allow-credentials").unwrap(),
        "true"
    );

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_form_override_reaches_delete_route() {
    let mut server = Server::new_base("127.0.0.1:0", ServerOptions::default()).unwrap();
    server
        .router_mut()
        .handle("/records/{id}", echo_method())
        .methods([Method::DELETE]);
    let running = start(server).await;

    let response = reqwest::Client::new()
        .post(running.url("/records/9"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("_method=DELETE")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "DELETE");

    running.stop().await.unwrap();
}

#[tokio::test]
async fn test_replication_through_server() {
    let options = ServerOptions::builder().enable_replication(true).build();
    let mut server = Server::new_base("127.0.0.1:0", options).unwrap();
    server.router_mut().handle("/x", echo_method());
    let running = start(server).await;

    let response = reqwest::Client::new()
        .get(running.url("/x"))
        .header("x-request-id", "req-7")
        .send()
        .await
        .unwrap();

    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-7");

    running.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_endpoint() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.sock");
    let endpoint = format!(r"\\{}", path.display());

    let server = Server::new_monitoring(&endpoint, ServerOptions::default(), None, None, None)
        .unwrap();
    assert_eq!(
        server.local_addr(),
        &ListenAddr::Pipe(path.display().to_string())
    );
    let running = start(server).await;

    let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
    stream
        .write_all(b"GET /healthz/liveness HTTP/1.1\r\nHost: local\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut raw))
        .await
        .unwrap()
        .unwrap();

    assert!(raw.starts_with("HTTP/1.1 200 OK"), "{raw}");
    assert!(raw.ends_with("ok"), "{raw}");

    running.stop().await.unwrap();
    assert!(!path.exists());
}
