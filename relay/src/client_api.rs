//! Client-facing listener: `GET /poll`, `POST /response`, `GET /health`

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use burrow_shared::protocol::{ResponseSubmission, POLL_PATH, REQUEST_ID, RESPONSE_PATH};
use burrow_shared::Error;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{append_headers, error_response, read_body, RelayState};

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route(POLL_PATH, get(poll_handler))
        .route(RESPONSE_PATH, post(response_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct PollParams {
    /// Seconds to hold the poll open when nothing is queued
    wait: Option<u64>,
}

async fn poll_handler(State(state): State<RelayState>, Query(params): Query<PollParams>) -> Response {
    let wait = params.wait.unwrap_or(0).min(state.config.max_long_poll_secs);

    let Some(req) = state.store.next_request(Duration::from_secs(wait)).await else {
        return StatusCode::NO_CONTENT.into_response();
    };
    debug!(request_id = %req.id, method = %req.method, path = %req.path, "Handing request to client");

    let mut builder = hyper::Response::builder().status(StatusCode::OK);
    if let Some(headers_mut) = builder.headers_mut() {
        append_headers(headers_mut, req.poll_headers());
    }
    match builder.body(Body::from(req.body)) {
        Ok(r) => r.into_response(),
        Err(e) => {
            warn!(request_id = %req.id, "Failed to build poll response: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Response build error").into_response()
        }
    }
}

async fn response_handler(State(state): State<RelayState>, req: Request<Body>) -> Response {
    let Some(id) = req
        .headers()
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
    else {
        warn!("Response submission without {}", REQUEST_ID);
        return error_response(&Error::MissingCorrelationId);
    };

    let limit = state.config.max_submission_bytes();
    let bytes = match read_body(req.into_body(), limit).await {
        Ok(b) => b,
        Err(e) => {
            warn!(request_id = %id, "Failed to read response submission: {}", e);
            return error_response(&e);
        }
    };

    let stored = serde_json::from_slice::<ResponseSubmission>(&bytes)
        .map_err(Error::from)
        .and_then(|submission| submission.into_response(id.clone()))
        .and_then(|response| {
            let status = response.status;
            state.store.submit_response(response).map(|()| status)
        });

    match stored {
        Ok(status) => {
            info!(request_id = %id, status, "Response received");
            StatusCode::OK.into_response()
        }
        Err(e) => {
            warn!(request_id = %id, "Rejected response submission: {}", e);
            error_response(&e)
        }
    }
}

async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    let stats = state.store.stats();
    Json(serde_json::json!({
        "status": "ok",
        "queued": stats.queued,
        "in_flight": stats.in_flight,
        "responded": stats.responded,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RelayConfig, StoreStats};
    use burrow_shared::protocol::{TunnelRequest, ORIGINAL_METHOD, ORIGINAL_PATH};
    use tower::util::ServiceExt;

    fn pending(id: &str, body: &[u8]) -> TunnelRequest {
        TunnelRequest {
            id: id.into(),
            method: "PUT".into(),
            path: "/items/7?force=true".into(),
            headers: vec![
                ("content-type".into(), "application/json".into()),
                ("x-trace".into(), "t1".into()),
            ],
            body: body.to_vec(),
        }
    }

    fn submit(id: Option<&str>, json: &str) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(RESPONSE_PATH);
        if let Some(id) = id {
            builder = builder.header(REQUEST_ID, id);
        }
        builder.body(Body::from(json.to_string())).unwrap()
    }

    async fn poll(app: Router) -> Response {
        app.oneshot(Request::builder().uri(POLL_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_poll_empty_returns_no_content() {
        let state = RelayState::new(RelayConfig::default());
        let response = poll(router(state)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_poll_encodes_request() {
        let state = RelayState::new(RelayConfig::default());
        state.store.enqueue_request(pending("id-1", b"{\"a\":1}")).await.unwrap();

        let response = poll(router(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[REQUEST_ID], "id-1");
        assert_eq!(headers[ORIGINAL_METHOD], "PUT");
        assert_eq!(headers[ORIGINAL_PATH], "/items/7?force=true");
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["x-trace"], "t1");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\"a\":1}");

        assert_eq!(state.store.stats().in_flight, 1);
        assert_eq!(poll(router(state)).await.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_poll_empty_bodied_request_is_not_no_content() {
        let state = RelayState::new(RelayConfig::default());
        state.store.enqueue_request(pending("id-2", b"")).await.unwrap();

        let response = poll(router(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID], "id-2");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_poll_rejects_post() {
        let state = RelayState::new(RelayConfig::default());
        let response = router(state)
            .oneshot(Request::builder().method("POST").uri(POLL_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_missing_request_id_rejected_without_state_change() {
        let state = RelayState::new(RelayConfig::default());
        state.store.enqueue_request(pending("id-3", b"")).await.unwrap();
        state.store.take_next_request().await.unwrap();
        let before = state.store.stats();

        let response = router(state.clone())
            .oneshot(submit(None, r#"{"status":200,"body":""}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.store.stats(), before);
        assert!(state.store.take_response("id-3").is_none());
    }

    #[tokio::test]
    async fn test_submit_stores_response() {
        let state = RelayState::new(RelayConfig::default());
        state.store.enqueue_request(pending("id-4", b"")).await.unwrap();
        state.store.take_next_request().await.unwrap();

        let response = router(state.clone())
            .oneshot(submit(
                Some("id-4"),
                r#"{"status":418,"headers":[["x-tea","pot"]],"body":"c2hvcnQ="}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stored = state.store.take_response("id-4").unwrap();
        assert_eq!(stored.status, 418);
        assert_eq!(stored.body, b"short");
        assert_eq!(stored.headers, vec![("x-tea".to_string(), "pot".to_string())]);
    }

    #[tokio::test]
    async fn test_submit_unknown_id_and_bad_payload() {
        let state = RelayState::new(RelayConfig::default());

        let response = router(state.clone())
            .oneshot(submit(Some("never-issued"), r#"{"status":200}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router(state.clone())
            .oneshot(submit(Some("never-issued"), "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.store.stats(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_long_poll_wait_parameter() {
        let state = RelayState::new(RelayConfig::default());
        let producer = state.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            producer.enqueue_request(pending("late", b"")).await.unwrap();
        });

        let response = router(state)
            .oneshot(Request::builder().uri("/poll?wait=5").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID], "late");
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let state = RelayState::new(RelayConfig::default());
        state.store.enqueue_request(pending("id-5", b"")).await.unwrap();

        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["queued"], 1);
        assert_eq!(json["in_flight"], 0);
    }
}
