use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

async fn stats() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": { "total": 50, "cr": 30, "jr": 20, "inProgress": 25, "completed": 25 }
    }))
}

async fn list(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let limit: usize = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(10);
    let page: u64 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let data: Vec<Value> = (0..limit).map(|i| json!({ "id": i + 1 })).collect();
    Json(json!({
        "success": true,
        "data": data,
        "pagination": { "total": 50, "totalPages": 50 / limit.max(1), "page": page }
    }))
}

async fn failing() -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(1_000))
}

async fn not_json() -> &'static str {
    "<html>maintenance</html>"
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({ "success": true }))
}

/// Serve a stand-in monitoring API on an ephemeral port.
pub async fn spawn_api() -> SocketAddr {
    let app = Router::new()
        .route("/api/monitoring/cr-jr/stats", get(stats))
        .route("/api/monitoring/cr-jr", get(list))
        .route("/failing", get(failing))
        .route("/not-json", get(not_json))
        .route("/slow", get(slow));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
