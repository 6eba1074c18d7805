//! Tunnel agent
//!
//! Polls the relay's client-facing listener, replays each polled request
//! against the target service and posts the target's answer back. One request
//! is handled at a time; no single failure ends the loop.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use burrow_shared::protocol::{
    header_value, HeaderList, RequestId, ResponseSubmission, TunnelRequest, CONTENT_TYPE,
    POLL_PATH, REQUEST_ID, RESPONSE_PATH,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Method, StatusCode};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;

/// Extra time a long poll may take beyond what the relay was asked to wait
const POLL_GRACE: Duration = Duration::from_secs(10);

pub struct TunnelAgent {
    config: AgentConfig,
    /// Talks to the relay
    relay: Client,
    /// Talks to the target; bounded by the forward timeout, never follows redirects
    target: Client,
}

impl TunnelAgent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;

        let relay = Client::builder()
            .build()
            .context("Failed to build relay client")?;
        let target = Client::builder()
            .timeout(config.forward_timeout())
            .redirect(redirect::Policy::none())
            .build()
            .context("Failed to build target client")?;

        Ok(Self {
            config,
            relay,
            target,
        })
    }

    /// Poll forever.
    pub async fn run(&self) {
        self.run_until(std::future::pending()).await
    }

    /// Poll until `shutdown` resolves.
    ///
    /// Shutdown interrupts a poll or the pause between polls, never a request
    /// that was already taken off the relay.
    pub async fn run_until<F: Future<Output = ()>>(&self, shutdown: F) {
        info!(
            server = %self.config.server_url,
            target = %self.config.target_url,
            "Client started, polling for requests"
        );
        tokio::pin!(shutdown);

        loop {
            let polled = tokio::select! {
                polled = self.poll() => polled,
                _ = &mut shutdown => break,
            };
            match polled {
                Ok(Some(request)) => {
                    self.handle(request).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!("Error polling server: {:#}", e),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                _ = &mut shutdown => break,
            }
        }
        info!("Shutting down...");
    }

    /// Forward one polled request and hand the outcome to the relay.
    ///
    /// A response the relay refuses (too large, malformed) would leave the
    /// caller parked until the relay times out, so it is replaced once by a
    /// synthesized 502.
    async fn handle(&self, request: TunnelRequest) {
        let id = request.id.clone();
        let submission = self.forward(request).await;

        let refused = match self.send_submission(&id, &submission).await {
            Ok(status) if status.is_success() => return,
            Ok(status @ (StatusCode::PAYLOAD_TOO_LARGE | StatusCode::BAD_REQUEST)) => {
                warn!(request_id = %id, %status, "Relay refused response");
                true
            }
            Ok(status) => {
                warn!(request_id = %id, %status, "Relay rejected response");
                false
            }
            // The relay may cut an oversized upload short instead of answering 413.
            Err(e) if !e.is_connect() && !e.is_timeout() => {
                warn!(request_id = %id, "Response upload interrupted: {}", e);
                true
            }
            Err(e) => {
                warn!(request_id = %id, "Error sending response: {}", e);
                false
            }
        };

        if refused {
            let fallback = ResponseSubmission::synthesized(502, "Target response rejected by relay");
            if let Err(e) = self.submit(&id, &fallback).await {
                warn!(request_id = %id, "Error sending fallback response: {:#}", e);
            }
        }
    }

    /// Fetch the next queued request, if any.
    pub async fn poll(&self) -> Result<Option<TunnelRequest>> {
        let wait = self.config.long_poll_secs;
        let mut builder = self.relay.get(self.relay_url(POLL_PATH));
        if wait > 0 {
            builder = builder
                .query(&[("wait", wait)])
                .timeout(Duration::from_secs(wait) + POLL_GRACE);
        } else {
            builder = builder.timeout(POLL_GRACE);
        }

        let resp = builder.send().await.context("Failed to poll server")?;
        match resp.status() {
            StatusCode::NO_CONTENT => return Ok(None),
            StatusCode::OK => {}
            other => anyhow::bail!("Unexpected poll status {}", other),
        }

        let headers = header_list(resp.headers());
        let body = resp
            .bytes()
            .await
            .context("Failed to read polled request")?;
        let request = TunnelRequest::from_poll(headers, body.to_vec())?;
        debug!(request_id = %request.id, method = %request.method, path = %request.path, "Polled request");
        Ok(Some(request))
    }

    /// Replay `request` against the target.
    ///
    /// Never fails: a target that cannot be reached yields a synthesized
    /// 502, one that does not answer within the forward timeout a 504, so the
    /// waiting caller is released either way.
    pub async fn forward(&self, request: TunnelRequest) -> ResponseSubmission {
        let Ok(method) = Method::from_bytes(request.method.as_bytes()) else {
            warn!(request_id = %request.id, method = %request.method, "Invalid method");
            return ResponseSubmission::synthesized(502, "Invalid method in tunneled request");
        };
        let url = format!("{}{}", self.config.target_url.trim_end_matches('/'), request.path);
        let started = Instant::now();

        let result = self
            .target
            .request(method, &url)
            .headers(forward_headers(&request.headers))
            .body(request.body)
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                warn!(request_id = %request.id, %url, "Target timed out");
                return ResponseSubmission::synthesized(504, "Target service timed out");
            }
            Err(e) => {
                warn!(request_id = %request.id, %url, "Failed to forward request to target: {}", e);
                return ResponseSubmission::synthesized(502, "Target service unreachable");
            }
        };

        let limit = self.config.max_body_bytes;
        if resp.content_length().is_some_and(|len| len > limit as u64) {
            warn!(request_id = %request.id, %url, limit, "Target response too large");
            return ResponseSubmission::synthesized(502, "Target response too large");
        }

        let status = resp.status().as_u16();
        let headers = header_list(resp.headers());
        let body = match resp.bytes().await {
            Ok(body) if body.len() > limit => {
                warn!(request_id = %request.id, %url, limit, "Target response too large");
                return ResponseSubmission::synthesized(502, "Target response too large");
            }
            Ok(body) => body.to_vec(),
            Err(e) if e.is_timeout() => {
                warn!(request_id = %request.id, %url, "Target timed out sending body");
                return ResponseSubmission::synthesized(504, "Target service timed out");
            }
            Err(e) => {
                warn!(request_id = %request.id, %url, "Failed to read target response: {}", e);
                return ResponseSubmission::synthesized(502, "Target response unreadable");
            }
        };

        info!(
            request_id = %request.id,
            status,
            latency_ms = started.elapsed().as_millis() as u64,
            "Forwarded {}",
            request.path
        );
        ResponseSubmission {
            status,
            headers,
            body,
        }
    }

    /// Post a response for `id` back to the relay. Not retried on failure.
    pub async fn submit(&self, id: &RequestId, submission: &ResponseSubmission) -> Result<()> {
        let status = self
            .send_submission(id, submission)
            .await
            .context("Failed to send response to server")?;
        if !status.is_success() {
            anyhow::bail!("Relay rejected response ({})", status);
        }
        Ok(())
    }

    async fn send_submission(
        &self,
        id: &RequestId,
        submission: &ResponseSubmission,
    ) -> reqwest::Result<StatusCode> {
        let resp = self
            .relay
            .post(self.relay_url(RESPONSE_PATH))
            .header(REQUEST_ID, id.as_str())
            .json(submission)
            .timeout(POLL_GRACE)
            .send()
            .await?;
        Ok(resp.status())
    }

    fn relay_url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url.trim_end_matches('/'), path)
    }
}

/// UTF-8 headers of a reqwest message as a list. Values that are not UTF-8
/// cannot travel through the relay and are dropped.
fn header_list(headers: &HeaderMap) -> HeaderList {
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

/// Headers for the forwarded call: content type first, then every original
/// header except `Host`, which must name the target.
fn forward_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut out = HeaderMap::new();
    if let Some(ct) = header_value(headers, CONTENT_TYPE).and_then(|v| HeaderValue::from_str(v).ok()) {
        out.insert(reqwest::header::CONTENT_TYPE, ct);
    }
    for (k, v) in headers {
        if k.eq_ignore_ascii_case("host") || k.eq_ignore_ascii_case(CONTENT_TYPE) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
            out.append(name, value);
        }
    }
    out
}
