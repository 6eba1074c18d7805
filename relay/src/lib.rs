//! Burrow Relay
//!
//! Public half of the tunnel: an external listener that parks each caller
//! until the tunnel agent answers, and a client-facing listener the agent
//! polls for work and posts responses to.

pub mod client_api;
pub mod config;
pub mod external;
pub mod server;
pub mod store;

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use burrow_shared::protocol::HeaderList;
use burrow_shared::Error;
use http_body_util::LengthLimitError;
use hyper::header::{HeaderName, HeaderValue};
use tracing::debug;

pub use config::RelayConfig;
pub use server::RelayServer;
pub use store::{CorrelationStore, StoreStats};

/// State injected into both routers
#[derive(Clone)]
pub struct RelayState {
    pub store: CorrelationStore,
    pub config: Arc<RelayConfig>,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            store: CorrelationStore::new(config.max_pending),
            config: Arc::new(config),
        }
    }
}

/// Plain-text error reply with the status the error maps to.
pub(crate) fn error_response(err: &Error) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string()).into_response()
}

/// UTF-8 headers as a list. Values that are not UTF-8 cannot be carried by
/// the poll protocol and are dropped.
pub(crate) fn header_list(headers: &HeaderMap) -> HeaderList {
    headers
        .iter()
        .filter_map(|(k, v)| match v.to_str() {
            Ok(val) => Some((k.as_str().to_string(), val.to_string())),
            Err(_) => {
                debug!(header = %k, "Dropping non-UTF-8 header value");
                None
            }
        })
        .collect()
}

/// Buffer a whole body, telling an oversized body (`BodyTooLarge`) apart
/// from one that failed mid-read (`Protocol`).
pub(crate) async fn read_body(body: Body, limit: usize) -> Result<Bytes, Error> {
    axum::body::to_bytes(body, limit).await.map_err(|err| {
        let too_large = std::iter::successors(
            Some(&err as &(dyn std::error::Error + 'static)),
            |e| e.source(),
        )
        .any(|e| e.is::<LengthLimitError>());

        if too_large {
            Error::BodyTooLarge(limit)
        } else {
            Error::Protocol(format!("failed to read body: {}", err))
        }
    })
}

/// Append every valid pair of `headers` to `target`, keeping repeats.
pub(crate) fn append_headers(target: &mut HeaderMap, headers: HeaderList) {
    for (k, v) in headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(&v)) {
            target.append(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[tokio::test]
    async fn test_read_body_over_limit() {
        let err = read_body(Body::from("too long"), 4).await.unwrap_err();
        assert!(matches!(err, Error::BodyTooLarge(4)));
    }

    #[tokio::test]
    async fn test_read_body_broken_stream() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let body = Body::from_stream(futures_util::stream::iter(chunks));

        let err = read_body(body, 1024).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_header_list_skips_non_utf8() {
        let mut headers = HeaderMap::new();
        headers.insert("x-text", HeaderValue::from_static("plain"));
        headers.insert("x-binary", HeaderValue::from_bytes(&[0xff, 0xfe]).unwrap());

        let list = header_list(&headers);
        assert_eq!(list, vec![("x-text".to_string(), "plain".to_string())]);
    }
}
