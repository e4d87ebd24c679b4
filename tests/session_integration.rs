//! Integration tests for graphcall sessions.
//!
//! These tests start a real listener on loopback and drive it through the
//! public client API to verify end-to-end behavior.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tokio::sync::Notify;

use graphcall::auth::{Authenticator, Credential, HmacChallenger, HmacResponder};
use graphcall::error::{AuthErrorKind, RpcError};
use graphcall::graph::{CallArgs, InvokeError, Member, Namespace, RemoteObject};
use graphcall::protocol::{Envelope, Expect};
use graphcall::session::{ClientSession, ServerSession, SessionOptions, SessionState};
use graphcall::socket::{dial, AcceptOptions, Connection, DialOptions, Listener};

const HMAC_SECRET: &[u8] = b"test-secret-key-for-integration-tests";

/// Counter exposed to remote callers.
struct Counter {
    count: Arc<AtomicI64>,
}

impl RemoteObject for Counter {
    fn type_name(&self) -> &'static str {
        "Counter"
    }

    fn member(&self, name: &str) -> Option<Member> {
        match name {
            "count" => Some(Member::value(self.count.load(Ordering::SeqCst))),
            "increment" => {
                let count = Arc::clone(&self.count);
                Some(Member::method(move |args: CallArgs| {
                    let step = args.optional_i64(0, "step").unwrap_or(1);
                    Ok(json!(count.fetch_add(step, Ordering::SeqCst) + step))
                }))
            }
            "fail" => Some(Member::method(|_args| Err(InvokeError::failed("counter is jammed")))),
            _ => None,
        }
    }
}

fn build_root(count: Arc<AtomicI64>) -> Arc<dyn RemoteObject> {
    let base: Arc<dyn RemoteObject> = Arc::new(
        Namespace::new("Base")
            .with_value("kind", "base")
            .with_method("describe", |_args| Ok(json!("inherited"))),
    );

    Arc::new(
        Namespace::new("Root")
            .with_object("counter", Arc::new(Counter { count }))
            .with_object(
                "settings",
                Arc::new(Namespace::new("Settings").with_value("limit", 5).writable()),
            )
            .with_value("config", json!({"name": "demo", "tags": ["a", "b"]}))
            .with_value("kind", "root")
            .with_method("echo", |args: CallArgs| Ok(args.require(0, "value")?.clone()))
            .with_method("slow", |_args| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(json!("slow-result"))
            })
            .with_base(base),
    )
}

/// Test server instance.
struct TestServer {
    port: u16,
    count: Arc<AtomicI64>,
    stop_requests: Arc<AtomicUsize>,
    closed_sessions: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
}

impl TestServer {
    /// Start a server accepting connections with `options`.
    async fn start(options: AcceptOptions) -> Self {
        let listener = Listener::bind("127.0.0.1", 0, 5)
            .await
            .expect("Failed to bind listener");
        let port = listener.local_addr().port();

        let count = Arc::new(AtomicI64::new(0));
        let root = build_root(Arc::clone(&count));
        let stop_requests = Arc::new(AtomicUsize::new(0));
        let closed_sessions = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(Notify::new());

        let hook_counter = Arc::clone(&stop_requests);
        let closed_counter = Arc::clone(&closed_sessions);
        let shutdown_for_run = Arc::clone(&shutdown);

        tokio::spawn(async move {
            loop {
                let root = Arc::clone(&root);
                let hook_counter = Arc::clone(&hook_counter);
                let session_options = SessionOptions::default()
                    .with_poll_interval(Duration::from_millis(50))
                    .with_stop_hook(move || {
                        hook_counter.fetch_add(1, Ordering::SeqCst);
                    });

                tokio::select! {
                    accepted = listener.accept(
                        move |conn| ServerSession::with_options(conn, root, session_options),
                        &options,
                    ) => {
                        match accepted {
                            Ok(Some(mut session)) => {
                                let closed_counter = Arc::clone(&closed_counter);
                                tokio::spawn(async move {
                                    if session.start().is_ok() {
                                        let _ = session.wait().await;
                                    }
                                    closed_counter.fetch_add(1, Ordering::SeqCst);
                                });
                            }
                            Ok(None) => continue,
                            Err(e) => {
                                eprintln!("Listener error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_for_run.notified() => break,
                }
            }
        });

        Self {
            port,
            count,
            stop_requests,
            closed_sessions,
            shutdown,
        }
    }

    /// Start a server without authentication.
    async fn open() -> Self {
        Self::start(AcceptOptions::default()).await
    }

    /// Connect a client session.
    async fn connect(&self, options: &DialOptions) -> Result<ClientSession, RpcError> {
        ClientSession::connect("127.0.0.1", self.port, options).await
    }

    fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }

    fn closed_sessions(&self) -> usize {
        self.closed_sessions.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

/// Poll `condition` for up to two seconds.
async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

fn remote_failure_kind(err: &RpcError) -> Option<&str> {
    match err {
        RpcError::RemoteFailure { message } => message.split(':').next(),
        _ => None,
    }
}

// ============================================================================
// Calls
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_increment_three_times() {
    let server = TestServer::open().await;
    let session = server.connect(&DialOptions::default()).await.unwrap();

    let increment = session.path("counter").path("increment");
    for expected in 1..=3 {
        let value = increment.invoke().await.unwrap();
        assert_eq!(value, json!(expected));
    }

    assert_eq!(session.get_attr_str("counter.count").await.unwrap(), "3");
    assert_eq!(server.count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_arguments_and_bare_fields() {
    let server = TestServer::open().await;
    let session = server.connect(&DialOptions::default()).await.unwrap();

    let mut kwargs = Map::new();
    kwargs.insert("step".to_string(), json!(10));
    let value = session
        .path("counter.increment")
        .call_with(Vec::new(), kwargs)
        .await
        .unwrap();
    assert_eq!(value, json!(10));

    // A bare field used as a verb returns its value.
    assert_eq!(session.path("counter.count").invoke().await.unwrap(), json!(10));
    assert_eq!(session.path("config.tags.1").invoke().await.unwrap(), json!("b"));
    assert_eq!(
        session.root().to_remote_string().await.unwrap(),
        "<Root object>"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_string_projection() {
    let server = TestServer::open().await;
    let session = server.connect(&DialOptions::default()).await.unwrap();

    assert_eq!(session.get_attr_str("config.name").await.unwrap(), "demo");
    assert_eq!(
        session.get_attr_str("config.tags").await.unwrap(),
        r#"["a","b"]"#
    );
    assert_eq!(
        session.path("counter").to_remote_string().await.unwrap(),
        "<Counter object>"
    );

    // Reading twice against an unchanged graph yields the same text.
    let first = session.get_attr_str("settings.limit").await.unwrap();
    let second = session.get_attr_str("settings.limit").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inherited_members() {
    let server = TestServer::open().await;
    let session = server.connect(&DialOptions::default()).await.unwrap();

    // Own member shadows the base one.
    assert_eq!(session.get_attr_str("kind").await.unwrap(), "root");
    assert_eq!(session.path("describe").invoke().await.unwrap(), json!("inherited"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_payload_round_trip() {
    let server = TestServer::open().await;
    let session = server.connect(&DialOptions::default()).await.unwrap();

    let text = "x".repeat(10_000);
    let value = session
        .path("echo")
        .call(vec![Value::String(text.clone())])
        .await
        .unwrap();
    assert_eq!(value, Value::String(text));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_failure_keeps_session_alive() {
    let server = TestServer::open().await;
    let session = server.connect(&DialOptions::default()).await.unwrap();

    let err = session.path("counter.fail").invoke().await.unwrap_err();
    assert_eq!(remote_failure_kind(&err), Some("Failed"));
    assert!(err.to_string().contains("counter is jammed"));

    let err = session.path("counter.count").call(vec![json!(1)]).await.unwrap_err();
    assert_eq!(remote_failure_kind(&err), Some("NotCallable"));

    assert_eq!(session.path("counter.increment").invoke().await.unwrap(), json!(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_call_closes_session() {
    let server = TestServer::open().await;
    let session = server.connect(&DialOptions::default()).await.unwrap();

    let cancelled = tokio::time::timeout(Duration::from_millis(50), session.path("slow").invoke()).await;
    assert!(cancelled.is_err());

    // The late reply must never answer a later call.
    assert!(!session.is_open().await);
    let err = session.path("echo").call(vec![json!("fast")]).await.unwrap_err();
    assert!(matches!(err, RpcError::Session { .. }), "unexpected error: {}", err);

    assert!(wait_until(|| server.closed_sessions() == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_paths() {
    let server = TestServer::open().await;
    let session = server.connect(&DialOptions::default()).await.unwrap();

    let err = session.attr("counter.missing").await.unwrap_err();
    assert!(matches!(err, RpcError::NameNotFound { ref path } if path == "counter.missing"));
    assert!(!session.exists("counter.missing").await.unwrap());

    let counter = session.attr("counter").await.unwrap();
    let increment = counter.attr("increment").await.unwrap();
    assert_eq!(increment.address(), "counter.increment");
    assert!(counter.attr("nope").await.is_err());

    // Unchecked handles fail at invocation time.
    let err = session.path("counter.missing").invoke().await.unwrap_err();
    assert_eq!(remote_failure_kind(&err), Some("NameNotFound"));
    assert_eq!(server.count(), 0);
}

// ============================================================================
// Remote writes
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_set_and_delete() {
    let server = TestServer::open().await;
    let session = server.connect(&DialOptions::default()).await.unwrap();

    let settings = session.attr("settings").await.unwrap();
    settings.set("limit", json!(50)).await.unwrap();
    assert_eq!(session.get_attr_str("settings.limit").await.unwrap(), "50");

    settings.set("mode", json!("fast")).await.unwrap();
    assert!(session.exists("settings.mode").await.unwrap());

    settings.delete("mode").await.unwrap();
    assert!(!session.exists("settings.mode").await.unwrap());

    let err = session.set_attr("counter.count", json!(99)).await.unwrap_err();
    assert_eq!(remote_failure_kind(&err), Some("ReadOnly"));
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_secret_authentication() {
    let options = AcceptOptions::default()
        .with_authenticator(Authenticator::secret("secret"))
        .with_socket_timeout(Duration::from_secs(5));
    let server = TestServer::start(options).await;

    let wrong = DialOptions::default().with_credential(Credential::fixed("wrong"));
    let err = server.connect(&wrong).await.unwrap_err();
    assert!(matches!(
        err,
        RpcError::Auth {
            kind: AuthErrorKind::Rejected
        }
    ));

    let right = DialOptions::default().with_credential(Credential::fixed("secret"));
    let session = server.connect(&right).await.unwrap();
    assert_eq!(session.path("counter.increment").invoke().await.unwrap(), json!(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_credential_times_out_then_rejects() {
    let options = AcceptOptions::default()
        .with_authenticator(Authenticator::secret("secret"))
        .with_socket_timeout(Duration::from_millis(200));
    let server = TestServer::start(options).await;

    // The acceptor gives up waiting for a credential and closes the socket.
    let err = server.connect(&DialOptions::default()).await.unwrap_err();
    assert!(err.is_connection_closed(), "unexpected error: {}", err);

    // The listener keeps accepting afterwards.
    let right = DialOptions::default().with_credential(Credential::fixed("secret"));
    assert!(server.connect(&right).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_computed_credential() {
    let options = AcceptOptions::default().with_authenticator(Authenticator::predicate(|value| {
        value
            .as_text()
            .map(|token| token.starts_with("token-"))
            .unwrap_or(false)
    }));
    let server = TestServer::start(options).await;

    let issued = Arc::new(AtomicUsize::new(0));
    let issued_for_dial = Arc::clone(&issued);
    let credential = Credential::computed(move || {
        let n = issued_for_dial.fetch_add(1, Ordering::SeqCst);
        format!("token-{}", n).into()
    });

    let options = DialOptions::default().with_credential(credential);
    let _first = server.connect(&options).await.unwrap();
    let _second = server.connect(&options).await.unwrap();
    assert_eq!(issued.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hmac_challenge() {
    let options = AcceptOptions::default().with_authenticator(Authenticator::validator(
        HmacChallenger::new(HMAC_SECRET, Duration::from_secs(5)),
    ));
    let server = TestServer::start(options).await;

    let intruder = DialOptions::default().with_credential(Credential::custom(HmacResponder::new(
        b"some-other-secret",
        Duration::from_secs(5),
    )));
    let err = server.connect(&intruder).await.unwrap_err();
    assert!(matches!(
        err,
        RpcError::Auth {
            kind: AuthErrorKind::Rejected
        }
    ));

    let trusted = DialOptions::default().with_credential(Credential::custom(HmacResponder::new(
        HMAC_SECRET,
        Duration::from_secs(5),
    )));
    let session = server.connect(&trusted).await.unwrap();
    assert_eq!(session.get_attr_str("config.name").await.unwrap(), "demo");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_accept_total_timeout() {
    let listener = Listener::bind("127.0.0.1", 0, 5).await.unwrap();
    let options = AcceptOptions::default().with_total_timeout(Duration::from_secs(1));

    let start = Instant::now();
    let accepted = listener.accept(ClientSession::new, &options).await.unwrap();
    let elapsed = start.elapsed();

    assert!(accepted.is_none());
    assert!(elapsed >= Duration::from_millis(900), "returned too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "returned too late: {:?}", elapsed);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_skips_queued_requests() {
    let server = TestServer::open().await;
    let mut conn = dial("127.0.0.1", server.port, &DialOptions::default(), |conn: Connection| conn)
        .await
        .unwrap();

    // Both envelopes are on the wire before the server reads either.
    conn.send_envelope(&Envelope::stop()).await.unwrap();
    conn.send_envelope(&Envelope::call("counter.increment", Vec::new(), Map::new()))
        .await
        .unwrap();

    let err = conn.recv(Expect::Json, Some(Duration::from_secs(5))).await.unwrap_err();
    assert!(err.is_connection_closed(), "unexpected error: {}", err);

    assert!(wait_until(|| server.closed_sessions() == 1).await);
    assert_eq!(server.stop_requests(), 1);
    assert_eq!(server.count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_stop() {
    let server = TestServer::open().await;
    let session = server.connect(&DialOptions::default()).await.unwrap();

    session.path("counter.increment").invoke().await.unwrap();
    session.stop().await.unwrap();
    assert!(!session.is_open().await);

    let err = session.path("counter.increment").invoke().await.unwrap_err();
    assert!(matches!(err, RpcError::Session { .. }));

    // Stopping twice is harmless.
    session.stop().await.unwrap();
    assert!(wait_until(|| server.stop_requests() == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drop_sends_stop() {
    let server = TestServer::open().await;
    {
        let session = server.connect(&DialOptions::default()).await.unwrap();
        session.path("counter.increment").invoke().await.unwrap();
    }

    assert!(wait_until(|| server.stop_requests() == 1).await);
    assert!(wait_until(|| server.closed_sessions() == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_sessions_share_graph() {
    let server = TestServer::open().await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let session = server.connect(&DialOptions::default()).await.unwrap();
        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                session.path("counter.increment").invoke().await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(server.count(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dialer_serves_graph() {
    let listener = Listener::bind("127.0.0.1", 0, 5).await.unwrap();
    let port = listener.local_addr().port();

    let count = Arc::new(AtomicI64::new(0));
    let root = build_root(Arc::clone(&count));

    // The dialing side exposes the graph, the accepting side drives it.
    let dialer = tokio::spawn(async move {
        let mut session = dial("127.0.0.1", port, &DialOptions::default(), |conn| {
            ServerSession::new(conn, root)
        })
        .await
        .unwrap();
        session.start().unwrap();
        session.wait().await.unwrap();
        session.state()
    });

    let options = AcceptOptions::default().with_total_timeout(Duration::from_secs(5));
    let controller = listener
        .accept(ClientSession::new, &options)
        .await
        .unwrap()
        .expect("dialer should connect");

    assert_eq!(controller.path("counter.increment").invoke().await.unwrap(), json!(1));
    controller.stop().await.unwrap();

    assert_eq!(dialer.await.unwrap(), SessionState::Closed);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
