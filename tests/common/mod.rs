//! In-process stand-in for the Graph API used by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use pagecast_service::config::GraphConfig;

pub const GOOD_TOKEN: &str = "EAAB-good-token";
pub const PAGE_ID: &str = "page-1";
/// A page whose inbox has no conversations
pub const EMPTY_PAGE_ID: &str = "page-empty";

#[derive(Clone)]
struct MockState {
    base_url: String,
    sent: Arc<Mutex<Vec<Value>>>,
}

pub struct MockGraph {
    pub base_url: String,
    sent: Arc<Mutex<Vec<Value>>>,
}

impl MockGraph {
    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            base_url: self.base_url.clone(),
            ..GraphConfig::default()
        }
    }

    /// Bodies of every `POST /me/messages`, in arrival order
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }
}

/// Serve the mock on an ephemeral port.
///
/// Conversations of `PAGE_ID` span two pages: `u1` and `u3` were active an
/// hour ago, `u2` two days ago, and `u1` appears twice.
/// Sends to `throttled` fail with code 613 and `Retry-After: 7`;
/// sends to `blocked` fail with 100/2018001.
pub async fn spawn_mock_graph() -> MockGraph {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let sent = Arc::new(Mutex::new(Vec::new()));

    let state = MockState {
        base_url: base_url.clone(),
        sent: sent.clone(),
    };
    let router = Router::new()
        .route("/me/messages", post(send_message))
        .route("/{page_id}/conversations", get(conversations))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    MockGraph { base_url, sent }
}

fn graph_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%z").to_string()
}

fn conversation(id: &str, page_id: &str, user: &str, updated: &str) -> Value {
    json!({
        "id": id,
        "participants": {
            "data": [
                { "id": user, "name": format!("User {}", user) },
                { "id": page_id, "name": "The Page" }
            ]
        },
        "updated_time": updated
    })
}

fn graph_error(
    status: StatusCode,
    code: i64,
    subcode: Option<i64>,
    message: &str,
    retry_after: Option<u64>,
) -> Response {
    let mut error = json!({
        "message": message,
        "type": "OAuthException",
        "code": code,
        "fbtrace_id": "AbCdEfGh"
    });
    if let Some(subcode) = subcode {
        error["error_subcode"] = json!(subcode);
    }
    let mut response = (status, Json(json!({ "error": error }))).into_response();
    if let Some(secs) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

fn token_ok(query: &HashMap<String, String>) -> bool {
    query.get("access_token").map(String::as_str) == Some(GOOD_TOKEN)
}

async fn conversations(
    State(state): State<MockState>,
    Path(page_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !token_ok(&query) {
        return graph_error(
            StatusCode::BAD_REQUEST,
            190,
            None,
            "Invalid OAuth access token.",
            None,
        );
    }
    if page_id == EMPTY_PAGE_ID {
        return Json(json!({ "data": [] })).into_response();
    }

    let recent = graph_time(Utc::now() - Duration::hours(1));
    let stale = graph_time(Utc::now() - Duration::hours(48));

    let body = match query.get("after") {
        None => json!({
            "data": [
                conversation("t_1", &page_id, "u1", &recent),
                conversation("t_2", &page_id, "u2", &stale)
            ],
            "paging": {
                "next": format!(
                    "{}/{}/conversations?access_token={}&after=cursor-2",
                    state.base_url, page_id, GOOD_TOKEN
                )
            }
        }),
        Some(_) => json!({
            "data": [
                conversation("t_3", &page_id, "u3", &recent),
                conversation("t_4", &page_id, "u1", &recent)
            ]
        }),
    };
    Json(body).into_response()
}

async fn send_message(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    if !token_ok(&query) {
        return graph_error(
            StatusCode::BAD_REQUEST,
            190,
            None,
            "Invalid OAuth access token.",
            None,
        );
    }

    let recipient = body["recipient"]["id"].as_str().unwrap_or_default().to_string();
    state.sent.lock().unwrap().push(body);

    match recipient.as_str() {
        "throttled" => graph_error(
            StatusCode::BAD_REQUEST,
            613,
            None,
            "Calls to this api have exceeded the rate limit.",
            Some(7),
        ),
        "blocked" => graph_error(
            StatusCode::BAD_REQUEST,
            100,
            Some(2018001),
            "No matching user found",
            None,
        ),
        _ => Json(json!({
            "recipient_id": recipient,
            "message_id": format!("m_{}", recipient)
        }))
        .into_response(),
    }
}
