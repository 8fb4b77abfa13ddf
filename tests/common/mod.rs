//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use liveclass_server::{config::Config, routes, state::AppState, store::RoomStore};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub config: Config,
    _dir: TempDir,
}

/// Test configuration; `extra` overrides or adds variables.
pub fn test_config(db_path: &str, extra: &[(&str, &str)]) -> Config {
    let mut vars = HashMap::from([
        ("DATABASE_URL".to_string(), format!("sqlite://{db_path}")),
        ("JWT_SECRET".to_string(), "test-secret".to_string()),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
    ]);
    vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    Config::from_vars(&vars).expect("test config")
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_env(&[]).await
    }

    pub async fn with_echo(echo_to_sender: bool) -> Self {
        let flag = echo_to_sender.to_string();
        Self::with_env(&[("RELAY_ECHO_TO_SENDER", flag.as_str())]).await
    }

    pub async fn with_env(extra: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("liveclass.db");
        let config = test_config(&db.display().to_string(), extra);
        let store = RoomStore::connect(&config.database_url, config.db_max_connections)
            .await
            .expect("connect");
        store.migrate().await.expect("migrate");
        let state = AppState::new(store, &config);
        let router = routes::app(state.clone());
        Self { router, state, config, _dir: dir }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let resp = self.router.clone().oneshot(req).await.expect("response");
        let status = resp.status();
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }

    /// Create a class and return its id.
    pub async fn create_class(&self, name: &str, capacity: u32) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/classes",
                Some(serde_json::json!({ "name": name, "maxParticipants": capacity })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["classId"].as_str().expect("classId").to_string()
    }

    pub async fn start_class(&self, id: &str) {
        let (status, body) = self
            .request(Method::POST, &format!("/api/classes/{id}/start"), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    /// Serve the app on an ephemeral port.
    pub async fn serve(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.ok();
        });
        addr
    }
}
