//! Reference implementation of the polling transport's HTTP contract
//! (`GET /history`, `POST /send`). Not used by any production path inside
//! this crate — a real deployment's peers run their own compatible
//! server — but test fixtures and the demo binary mount it directly.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::log::PersistentMessageLog;

/// The log's `msg_type` tag used for entries the polling transport's
/// reference server appends; distinguishes them from signaling envelopes
/// sharing the same room/log.
const CHAT_TYPE: &str = "chat";

#[derive(Clone)]
struct ServerState {
    log: Arc<PersistentMessageLog>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    room: String,
    since: i64,
}

#[derive(Debug, Serialize)]
struct HistoryEntryBody {
    peer_id: String,
    text: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct SendBody {
    room: String,
    peer_id: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct SendResponseBody {
    timestamp: i64,
}

pub fn router(log: Arc<PersistentMessageLog>) -> Router {
    Router::new()
        .route("/history", get(history))
        .route("/send", post(send))
        .with_state(ServerState { log })
}

async fn history(State(state): State<ServerState>, Query(query): Query<HistoryQuery>) -> impl IntoResponse {
    match state.log.read(&query.room, Some(CHAT_TYPE), query.since) {
        Ok(entries) => {
            let body: Vec<HistoryEntryBody> = entries
                .into_iter()
                .map(|e| HistoryEntryBody { peer_id: e.peer_id, text: String::from_utf8_lossy(&e.payload).into_owned(), timestamp: e.timestamp })
                .collect();
            Json(body).into_response()
        }
        Err(err) => {
            warn!(room = %query.room, error = %err, "history query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn send(State(state): State<ServerState>, Json(body): Json<SendBody>) -> impl IntoResponse {
    match state.log.append(&body.room, &body.peer_id, CHAT_TYPE, body.text.as_bytes(), None) {
        Ok(entry) => Json(SendResponseBody { timestamp: entry.timestamp }).into_response(),
        Err(err) => {
            warn!(room = %body.room, error = %err, "send append failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn temp_log() -> (Arc<PersistentMessageLog>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (Arc::new(PersistentMessageLog::open(dir.path()).unwrap()), dir)
    }

    #[tokio::test]
    async fn send_then_history_round_trips() {
        let (log, _dir) = temp_log();
        let app = router(log);

        let send_req = Request::builder()
            .method("POST")
            .uri("/send")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"room":"room-a","peer_id":"alice","text":"hello"}"#))
            .unwrap();
        let send_resp = app.clone().oneshot(send_req).await.unwrap();
        assert_eq!(send_resp.status(), StatusCode::OK);

        let history_req = Request::builder().uri("/history?room=room-a&since=0").body(Body::empty()).unwrap();
        let history_resp = app.oneshot(history_req).await.unwrap();
        assert_eq!(history_resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(history_resp.into_body(), usize::MAX).await.unwrap();
        let entries: Vec<HistoryEntryBody> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].peer_id, "alice");
        assert_eq!(entries[0].text, "hello");
    }
}
