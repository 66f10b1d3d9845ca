#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use livequiz_api::{
    config::{Config, LiveConfig},
    create_router,
    middlewares::auth::{JwtClaims, ADMIN_ROLE},
    services::{session_scheduler::SessionScheduler, AppState},
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

pub fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".to_string(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        live: LiveConfig {
            timer_broadcast_interval_ms: 200,
            scheduler_tick_ms: 100,
            disconnect_grace_secs: 1,
            room_channel_capacity: 64,
            submission_grace_secs: 30,
        },
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn create_test_state() -> Arc<AppState> {
    init_tracing();
    Arc::new(AppState::new(test_config()))
}

pub fn create_test_app() -> (Router, Arc<AppState>) {
    let state = create_test_state();
    (create_router(state.clone()), state)
}

/// Serves the app on an ephemeral port with the scheduler running.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    server: tokio::task::JoinHandle<()>,
    scheduler: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let state = create_test_state();
        let app = create_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server");
        });
        let scheduler = SessionScheduler::new(state.live_quizzes.clone()).spawn();
        Self {
            addr,
            state,
            server,
            scheduler,
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/v1/realtime", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.scheduler.abort();
        self.server.abort();
    }
}

pub fn token(claims: &JwtClaims) -> String {
    livequiz_api::middlewares::auth::JwtService::new(TEST_JWT_SECRET)
        .generate_token(claims)
        .expect("sign test token")
}

pub fn admin_token() -> String {
    token(&JwtClaims::new("admin-1", ADMIN_ROLE, 3600))
}

pub fn student_token(user_id: &str, departments: &[&str]) -> String {
    token(&JwtClaims::new(user_id, "student", 3600).with_departments(departments.iter().copied()))
}

/// Sends one request through the router and returns status plus JSON body.
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub async fn create_quiz(app: &Router, body: Value) -> String {
    let (status, json) = send(app, "POST", "/api/v1/live-quizzes", Some(&admin_token()), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", json);
    json["quizId"].as_str().unwrap().to_string()
}
