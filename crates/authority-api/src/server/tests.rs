use std::net::TcpStream;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tungstenite::stream::MaybeTlsStream;

use crate::collaborators::{BanRecord, MemoryCollaborators};
use crate::session::Claims;

use super::*;

const SECRET: &str = "server-test-secret";

fn settings() -> ServerSettings {
    let mut config = contracts::SimulationConfig::default();
    config.tick_interval_ms = 20;
    ServerSettings {
        addr: "127.0.0.1:0".parse().expect("addr"),
        sqlite_path: String::new(),
        token_secret: SECRET.to_string(),
        admin_token: Some("static-admin".to_string()),
        config,
    }
}

fn test_state() -> (AppState, Arc<MemoryCollaborators>) {
    let backend = Arc::new(MemoryCollaborators::new());
    let collaborators = Collaborators::from_backend(backend.clone());
    let directory = Arc::new(ConnectionDirectory::new());
    let (persist_tx, _persist) = spawn_persist_worker(collaborators.store.clone(), 1_000, 1_000);
    let (economy_tx, _economy) = spawn_economy_worker(collaborators.ledger.clone(), directory.clone());
    let effects = EffectRouter::new(directory, persist_tx, economy_tx);
    (AppState::new(&settings(), collaborators, effects), backend)
}

async fn http(addr: std::net::SocketAddr, request: &str) -> (u16, String) {
    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.expect("read");
    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status line");
    (status, raw)
}

fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

fn post(path: &str, bearer: Option<&str>, body: &str) -> String {
    let auth = bearer
        .map(|token| format!("Authorization: Bearer {token}\r\n"))
        .unwrap_or_default();
    format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n{auth}Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

async fn spawn_app(state: AppState) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });
    addr
}

type Client = tungstenite::WebSocket<MaybeTlsStream<TcpStream>>;

fn token_for(user_id: &str, role: Role) -> String {
    TokenSigner::new(SECRET)
        .sign(&Claims {
            sub: user_id.to_string(),
            name: user_id.to_string(),
            roles: vec![role],
            exp: None,
        })
        .expect("sign")
}

fn connect(addr: std::net::SocketAddr, token: &str) -> Client {
    let url = format!("ws://{addr}/api/v1/spaces/bay/socket?token={token}");
    let (client, _) = tungstenite::connect(url).expect("ws connect");
    if let MaybeTlsStream::Plain(stream) = client.get_ref() {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
    }
    client
}

/// Skips frames until `event` arrives and returns its data.
fn next_event(client: &mut Client, event: &str) -> serde_json::Value {
    loop {
        match client.read().expect("frame") {
            tungstenite::Message::Text(text) => {
                let frame: serde_json::Value = serde_json::from_str(&text).expect("json frame");
                if frame["event"] == event {
                    return frame["data"].clone();
                }
            }
            tungstenite::Message::Close(_) => panic!("closed before {event}"),
            _ => {}
        }
    }
}

/// True once the server closes the socket; false if it stays open.
fn closes(client: &mut Client) -> bool {
    loop {
        match client.read() {
            Ok(tungstenite::Message::Close(_)) => return true,
            Ok(_) => continue,
            Err(tungstenite::Error::Io(err))
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return false
            }
            Err(_) => return true,
        }
    }
}

fn griefer_ban() -> BanRecord {
    BanRecord {
        user_id: Some("mallory".to_string()),
        username: None,
        space_id: None,
        reason: Some("griefing".to_string()),
        expires_at: None,
    }
}

#[test]
fn bearer_token_requires_scheme_and_value() {
    let mut headers = HeaderMap::new();
    assert_eq!(bearer_token(&headers), None);

    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
    assert_eq!(bearer_token(&headers), Some("abc.def"));

    headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
    assert_eq!(bearer_token(&headers), None);

    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
    assert_eq!(bearer_token(&headers), None);
}

#[test]
fn rejections_map_to_http_statuses() {
    let missing = HttpApiError::from_rejection(CommandRejection::SpaceNotActive("bay".into()));
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.error.error_code, ErrorCode::SpaceNotFound);

    let duplicate = HttpApiError::from_rejection(CommandRejection::DuplicateEvent("evt".into()));
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let invalid = HttpApiError::from_rejection(CommandRejection::NoVessel);
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert_eq!(invalid.error.error_code, ErrorCode::InvalidCommand);
}

#[tokio::test]
async fn admin_accepts_static_token_or_admin_claims() {
    let (state, _backend) = test_state();
    let signer = TokenSigner::new(SECRET);
    let token = |role: Role| {
        signer
            .sign(&Claims {
                sub: "u1".to_string(),
                name: "Una".to_string(),
                roles: vec![role],
                exp: None,
            })
            .expect("sign")
    };

    let mut headers = HeaderMap::new();
    assert!(require_admin(&state, &headers).is_err());

    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer static-admin"));
    assert!(require_admin(&state, &headers).is_ok());

    let admin = format!("Bearer {}", token(Role::Admin));
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&admin).expect("header"));
    assert!(require_admin(&state, &headers).is_ok());

    let player = format!("Bearer {}", token(Role::Player));
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&player).expect("header"));
    let err = require_admin(&state, &headers).expect_err("player is not admin");
    assert_eq!(err.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn http_surface_reports_health_status_and_guards_admin_routes() {
    let (state, _backend) = test_state();
    let addr = spawn_app(state).await;

    let (status, body) = http(addr, &get("/api/v1/health")).await;
    assert_eq!(status, 200);
    assert!(body.contains("\"ok\""));
    assert!(body.contains("access-control-allow-origin"));

    let (status, body) = http(addr, &get("/api/v1/spaces/nowhere/status")).await;
    assert_eq!(status, 404);
    assert!(body.contains("space_not_found"));

    let (status, _) = http(
        addr,
        &post("/api/v1/spaces/bay/environment", None, r#"{"preset":"calm"}"#),
    )
    .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn admin_can_schedule_events_and_duplicates_conflict() {
    let (state, _backend) = test_state();
    let addr = spawn_app(state.clone()).await;
    let body = r#"{"id":"squall","pattern":"stormy","run_at":4102444800000}"#;

    let (status, created) = http(
        addr,
        &post("/api/v1/spaces/bay/environment/events", Some("static-admin"), body),
    )
    .await;
    assert_eq!(status, 201);
    assert!(created.contains("\"squall\""));

    let (status, _) = http(
        addr,
        &post("/api/v1/spaces/bay/environment/events", Some("static-admin"), body),
    )
    .await;
    assert_eq!(status, 409);

    let status = state.inner.lock().await.status("bay").expect("activated");
    assert_eq!(status.pending_events, 1);
}

#[tokio::test]
async fn tick_driver_runs_until_shutdown() {
    let (state, _backend) = test_state();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = tokio::spawn(run_tick_driver(state.clone(), shutdown_rx));

    tokio::time::sleep(Duration::from_millis(80)).await;
    shutdown_tx.send(true).expect("driver listening");
    let passes = tokio::time::timeout(Duration::from_secs(2), driver)
        .await
        .expect("driver stops")
        .expect("driver joins");
    assert!(passes >= 1);
    let timings = state.inner.lock().await.metrics().timings;
    assert_eq!(timings.tick.count, passes);
    assert_eq!(timings.broadcast.count, passes);
}

#[tokio::test(flavor = "multi_thread")]
async fn banned_user_is_refused_and_disconnected_at_admission() {
    let (state, backend) = test_state();
    backend.add_ban(griefer_ban());
    let addr = spawn_app(state.clone()).await;

    let token = token_for("mallory", Role::Player);
    let (error, closed) = tokio::task::spawn_blocking(move || {
        let mut client = connect(addr, &token);
        let error = next_event(&mut client, "error");
        (error, closes(&mut client))
    })
    .await
    .expect("client joins");

    assert_eq!(error, "Banned: griefing");
    assert!(closed);
    assert!(state.inner.lock().await.sessions().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn re_authenticating_as_a_banned_user_closes_the_socket() {
    let (state, backend) = test_state();
    backend.add_ban(griefer_ban());
    let addr = spawn_app(state.clone()).await;

    let alice = token_for("alice", Role::Player);
    let mallory = token_for("mallory", Role::Player);
    let (ready, error, closed) = tokio::task::spawn_blocking(move || {
        let mut client = connect(addr, &alice);
        let ready = next_event(&mut client, "session:ready");
        let auth = json!({ "event": "user:auth", "data": { "token": mallory } });
        client
            .send(tungstenite::Message::Text(auth.to_string()))
            .expect("send auth");
        let error = next_event(&mut client, "error");
        (ready, error, closes(&mut client))
    })
    .await
    .expect("client joins");

    assert_eq!(ready["user_id"], "alice");
    assert_eq!(error, "Banned: griefing");
    assert!(closed);

    let mut cleared = false;
    for _ in 0..50 {
        if state.inner.lock().await.sessions().is_empty() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cleared);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_login_evicts_the_first_socket() {
    let (state, _backend) = test_state();
    let addr = spawn_app(state.clone()).await;

    let token = token_for("alice", Role::Player);
    let (notice, closed, second_ready) = tokio::task::spawn_blocking(move || {
        let mut first = connect(addr, &token);
        next_event(&mut first, "session:ready");
        let mut second = connect(addr, &token);
        let second_ready = next_event(&mut second, "session:ready");
        let notice = next_event(&mut first, "error");
        (notice, closes(&mut first), second_ready)
    })
    .await
    .expect("client joins");

    assert_eq!(notice, EVICTION_NOTICE);
    assert!(closed);
    let live = state
        .inner
        .lock()
        .await
        .sessions()
        .active_for("bay", "alice")
        .map(|connection| connection.0);
    assert_eq!(live, second_ready["connection_id"].as_u64());
}

#[tokio::test]
async fn metrics_route_reports_spaces_and_driver_timings() {
    let (state, _backend) = test_state();
    state
        .inner
        .lock()
        .await
        .activate_space("bay", authority_core::SpaceSeed::default(), 0);
    let addr = spawn_app(state).await;

    let (status, body) = http(addr, &get("/api/v1/metrics")).await;
    assert_eq!(status, 200);
    assert!(body.contains("\"space_id\":\"bay\""));
    assert!(body.contains("\"broadcast\""));

    let (status, body) = http(addr, &get("/api/v1/spaces/bay/status")).await;
    assert_eq!(status, 200);
    assert!(body.contains("\"ai_vessels\":0"));
}
