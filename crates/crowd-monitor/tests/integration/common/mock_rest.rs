//! Mock REST backend for integration tests.
//!
//! Serves `/api/temples`, `/api/temples/{name}` and `/api/history` from
//! mutable in-memory state, and counts requests per endpoint.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct RestState {
    temples: Vec<Value>,
    history: HashMap<String, Vec<Value>>,
    failing: bool,
    snapshot_requests: u32,
    history_requests: Vec<String>,
}

type SharedState = Arc<Mutex<RestState>>;

/// Build a reading as the backend serializes it.
pub fn reading_json(temple: &str, people_count: u32, last_updated: &str) -> Value {
    let level = match people_count {
        0..=20 => "Low",
        21..=40 => "Medium",
        _ => "High",
    };
    json!({
        "temple": temple,
        "peopleCount": people_count,
        "lastUpdated": last_updated,
        "nextHour": "N/A",
        "crowdLevel": level
    })
}

/// A mock REST backend.
pub struct MockRestServer {
    addr: SocketAddr,
    state: SharedState,
}

impl MockRestServer {
    pub async fn start() -> Self {
        let state: SharedState = Arc::new(Mutex::new(RestState::default()));

        let router = Router::new()
            .route("/api/temples", get(temples))
            .route("/api/temples/{name}", get(temple))
            .route("/api/history", get(history))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Replace the latest readings served by `/api/temples`.
    pub async fn set_temples(&self, temples: Vec<Value>) {
        self.state.lock().await.temples = temples;
    }

    /// Set the newest-first history of one temple.
    pub async fn set_history(&self, temple: &str, readings: Vec<Value>) {
        self.state
            .lock()
            .await
            .history
            .insert(temple.to_string(), readings);
    }

    /// Answer every request with `success: false`.
    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }

    pub async fn snapshot_requests(&self) -> u32 {
        self.state.lock().await.snapshot_requests
    }

    /// Temples requested from `/api/history`, in order.
    pub async fn history_requests(&self) -> Vec<String> {
        self.state.lock().await.history_requests.clone()
    }
}

fn failure() -> Json<Value> {
    Json(json!({"success": false, "message": "database unavailable"}))
}

async fn temples(State(state): State<SharedState>) -> Json<Value> {
    let mut state = state.lock().await;
    state.snapshot_requests += 1;
    if state.failing {
        return failure();
    }
    Json(json!({"success": true, "data": state.temples}))
}

async fn temple(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    let state = state.lock().await;
    if state.failing {
        return (StatusCode::OK, failure());
    }
    match state.temples.iter().find(|t| t["temple"] == name.as_str()) {
        Some(reading) => (
            StatusCode::OK,
            Json(json!({"success": true, "data": reading})),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": format!("Temple {name} not found")})),
        ),
    }
}

async fn history(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut state = state.lock().await;
    let temple = params.get("temple").cloned().unwrap_or_default();
    let limit: usize = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(10);
    state.history_requests.push(temple.clone());
    if state.failing {
        return failure();
    }
    let data: Vec<Value> = state
        .history
        .get(&temple)
        .map(|readings| readings.iter().take(limit).cloned().collect())
        .unwrap_or_default();
    Json(json!({"success": true, "count": data.len(), "data": data}))
}
