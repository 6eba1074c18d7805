//! External listener
//!
//! Every method and path is tunneled: the request is buffered, queued under a
//! fresh id, and the handler parks until the agent's response arrives or the
//! response timeout expires.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use burrow_shared::protocol::{RequestId, TunnelRequest, TunnelResponse};
use burrow_shared::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::CorrelationStore;
use crate::{append_headers, error_response, header_list, read_body, RelayState};

pub fn router(state: RelayState) -> Router {
    Router::new()
        .fallback(any(tunnel_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 128-bit random correlation id
pub fn new_request_id() -> RequestId {
    Uuid::new_v4().to_string()
}

/// Retires the id when the handler finishes or its caller disconnects.
struct RetireOnDrop {
    store: CorrelationStore,
    id: RequestId,
}

impl Drop for RetireOnDrop {
    fn drop(&mut self) {
        if self.store.retire(&self.id) {
            debug!(request_id = %self.id, "Retired unanswered request");
        }
    }
}

async fn tunnel_handler(State(state): State<RelayState>, req: Request<Body>) -> Response {
    let id = new_request_id();
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = header_list(req.headers());

    // The body must be fully read before the request is queued.
    let limit = state.config.max_body_bytes;
    let body = match read_body(req.into_body(), limit).await {
        Ok(b) => b.to_vec(),
        Err(e) => {
            warn!(%method, %path, "Failed to read request body: {}", e);
            return error_response(&e);
        }
    };

    let request = TunnelRequest {
        id: id.clone(),
        method: method.clone(),
        path: path.clone(),
        headers,
        body,
    };
    if let Err(e) = state.store.enqueue_request(request).await {
        warn!(request_id = %id, "Rejected external request: {}", e);
        return error_response(&e);
    }
    let _guard = RetireOnDrop {
        store: state.store.clone(),
        id: id.clone(),
    };
    info!(request_id = %id, %method, %path, "External request queued");

    match state.store.wait_response(&id, state.config.response_timeout()).await {
        Ok(resp) => {
            info!(request_id = %id, status = resp.status, "Delivering response");
            build_response(resp)
        }
        Err(Error::Timeout) => {
            warn!(request_id = %id, "No response from tunnel client in time");
            (StatusCode::GATEWAY_TIMEOUT, "Timed out waiting for tunnel client").into_response()
        }
        Err(e) => {
            warn!(request_id = %id, "Request abandoned: {}", e);
            error_response(&e)
        }
    }
}

fn build_response(resp: TunnelResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = hyper::Response::builder().status(status);
    if let Some(headers_mut) = builder.headers_mut() {
        append_headers(headers_mut, resp.headers);
    }
    match builder.body(Body::from(resp.body)) {
        Ok(r) => r.into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Response build error").into_response(),
    }
}
