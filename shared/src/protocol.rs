//! Poll/submit protocol spoken on the relay's client-facing listener.
//!
//! A polled request travels as an HTTP response: the correlation id, original
//! method and path ride in dedicated headers, the original headers follow, and
//! the body is the original body verbatim. A response travels back as a JSON
//! [`ResponseSubmission`] posted with the `Request-ID` header.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Correlation identifier header (poll response and response submission)
pub const REQUEST_ID: &str = "Request-ID";
/// Method of the tunneled request
pub const ORIGINAL_METHOD: &str = "Original-Method";
/// Path and query of the tunneled request
pub const ORIGINAL_PATH: &str = "Original-Path";
pub const CONTENT_TYPE: &str = "Content-Type";

/// Poll endpoint path on the client-facing listener
pub const POLL_PATH: &str = "/poll";
/// Response submission path on the client-facing listener
pub const RESPONSE_PATH: &str = "/response";

/// Maximum body size accepted by default (10 MB)
pub const DEFAULT_MAX_BODY: usize = 10 * 1024 * 1024;

/// Opaque correlation identifier
pub type RequestId = String;

/// Header multimap, order preserved. Values are UTF-8; non-UTF-8 header
/// values are dropped at both ends of the tunnel.
pub type HeaderList = Vec<(String, String)>;

const PROTOCOL_HEADERS: &[&str] = &[REQUEST_ID, ORIGINAL_METHOD, ORIGINAL_PATH];

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers that describe a single hop and must never be copied across one.
/// `content-length` is included: every hop re-frames the buffered body.
pub fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn is_protocol_header(name: &str) -> bool {
    PROTOCOL_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// First value of `name` in `headers`, case-insensitive.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Request captured at the relay's external listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub id: RequestId,
    pub method: String,
    /// Path plus query string, e.g. `/foo?x=1`
    pub path: String,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

impl TunnelRequest {
    /// Headers of the poll response carrying this request.
    ///
    /// Original headers that collide with the protocol headers are dropped so a
    /// caller cannot spoof the correlation id.
    pub fn poll_headers(&self) -> HeaderList {
        let mut out = vec![
            (REQUEST_ID.to_string(), self.id.clone()),
            (ORIGINAL_METHOD.to_string(), self.method.clone()),
            (ORIGINAL_PATH.to_string(), self.path.clone()),
        ];
        if let Some(ct) = header_value(&self.headers, CONTENT_TYPE) {
            out.push((CONTENT_TYPE.to_string(), ct.to_string()));
        }
        out.extend(
            self.headers
                .iter()
                .filter(|(k, _)| {
                    !is_protocol_header(k)
                        && !is_hop_by_hop(k)
                        && !k.eq_ignore_ascii_case(CONTENT_TYPE)
                })
                .cloned(),
        );
        out
    }

    /// Rebuild a request from a poll response's headers and body.
    pub fn from_poll(headers: HeaderList, body: Vec<u8>) -> Result<Self> {
        let required = |name: &str| {
            header_value(&headers, name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::Protocol(format!("missing {} in polled request", name)))
        };
        let id = required(REQUEST_ID)?;
        let method = required(ORIGINAL_METHOD)?;
        let path = required(ORIGINAL_PATH)?;

        let headers = headers
            .into_iter()
            .filter(|(k, _)| {
                !is_protocol_header(k) && !is_hop_by_hop(k) && !k.eq_ignore_ascii_case("date")
            })
            .collect();

        Ok(Self {
            id,
            method,
            path,
            headers,
            body,
        })
    }
}

/// Completed response waiting at the relay for its caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelResponse {
    pub id: RequestId,
    pub status: u16,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

/// Body of `POST /response`. The id travels in the `Request-ID` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSubmission {
    /// Status returned by the target
    pub status: u16,
    #[serde(default)]
    pub headers: HeaderList,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl ResponseSubmission {
    /// Response synthesized by the agent when the target could not answer.
    pub fn synthesized(status: u16, message: &str) -> Self {
        Self {
            status,
            headers: vec![(
                CONTENT_TYPE.to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: message.as_bytes().to_vec(),
        }
    }

    /// Bind the submission to `id`, rejecting status codes HTTP cannot carry.
    pub fn into_response(self, id: RequestId) -> Result<TunnelResponse> {
        if !(100..=999).contains(&self.status) {
            return Err(Error::Protocol(format!("invalid status code {}", self.status)));
        }
        let headers = self
            .headers
            .into_iter()
            .filter(|(k, _)| !is_hop_by_hop(k))
            .collect();
        Ok(TunnelResponse {
            id,
            status: self.status,
            headers,
            body: self.body,
        })
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
