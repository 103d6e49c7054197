//! The client capability: perform one request, report what happened.
//!
//! Each worker owns one client, and each client owns one connection slot (a
//! keep-alive pool pinned to a single idle connection), so connections are
//! never shared across workers. The transport is asked for the configured
//! variant once at startup; after that the engine only ever sees
//! [`Client::execute`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Identity;
use reqwest::header::HeaderMap;

use crate::config::{ClientKind, Config};
use crate::factory::{BodySource, RequestFactory, RequestPlan};
use crate::metrics::ByteMeters;

/// What one request came to: the status line (0 if no response arrived), the
/// wall time of the round trip in whole microseconds, and the canonical error
/// description if the transport failed.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub status: u16,
    pub elapsed_us: u64,
    pub error: Option<String>,
}

#[async_trait]
pub trait Client: Send {
    async fn execute(&mut self) -> Outcome;
}

/// Builds the transport for one connection slot.
pub fn build_transport(config: &Config, identity: Option<Identity>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .pool_max_idle_per_host(1)
        .danger_accept_invalid_certs(config.insecure);

    builder = match config.client {
        ClientKind::Http1 => builder.http1_only(),
        // ALPN settles on h2 when the peer offers it.
        ClientKind::Http2 => builder,
        ClientKind::FastHttp1 => builder.http1_only().tcp_nodelay(true),
    };
    if let Some(identity) = identity {
        builder = builder.identity(identity);
    }
    builder.build().context("failed to build HTTP client")
}

/// A connection slot: one transport, one request factory, shared byte meters.
pub struct PooledClient {
    transport: reqwest::Client,
    factory: Box<dyn RequestFactory>,
    timeout: Duration,
    meters: Arc<ByteMeters>,
    calls: Arc<AtomicU64>,
}

impl PooledClient {
    pub fn new(
        transport: reqwest::Client,
        factory: Box<dyn RequestFactory>,
        timeout: Duration,
        meters: Arc<ByteMeters>,
        calls: Arc<AtomicU64>,
    ) -> Self {
        Self {
            transport,
            factory,
            timeout,
            meters,
            calls,
        }
    }

    async fn round_trip(&self, plan: RequestPlan) -> Result<u16, (u16, String)> {
        let head_size = request_head_size(&plan);
        let (body, body_len) = match plan.body {
            BodySource::Bytes(bytes) => {
                let len = bytes.len();
                (reqwest::Body::from(bytes), len as u64)
            }
            BodySource::File(path) => {
                let len = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|err| (0, err.to_string()))?;
                (reqwest::Body::from(file), len)
            }
        };

        let mut headers = HeaderMap::new();
        for (name, value) in plan.headers {
            headers.append(name, value);
        }

        // Client-side estimate of the serialized request; TLS framing and
        // transport-added headers are not counted.
        self.meters.add_written((head_size as u64 + body_len) as i64);

        let request = self
            .transport
            .request(plan.method, plan.url)
            .timeout(self.timeout)
            .headers(headers)
            .body(body);

        match request.send().await {
            Ok(mut response) => {
                let status = response.status().as_u16();
                loop {
                    match response.chunk().await {
                        Ok(Some(chunk)) => self.meters.add_read(chunk.len() as i64),
                        Ok(None) => return Ok(status),
                        Err(err) => return Err((status, canonical_description(&err))),
                    }
                }
            }
            Err(err) => Err((0, canonical_description(&err))),
        }
    }
}

#[async_trait]
impl Client for PooledClient {
    async fn execute(&mut self) -> Outcome {
        let seq = self.calls.fetch_add(1, Ordering::Relaxed);
        let plan = self.factory.next(seq);

        let start = Instant::now();
        let result = self.round_trip(plan).await;
        let elapsed_us = start.elapsed().as_micros() as u64;

        match result {
            Ok(status) => Outcome {
                status,
                elapsed_us,
                error: None,
            },
            Err((status, description)) => Outcome {
                status,
                elapsed_us,
                error: Some(description),
            },
        }
    }
}

/// Stable description for aggregation: timeouts collapse to `"timeout"`,
/// everything else reports its innermost cause.
fn canonical_description(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return "timeout".to_owned();
    }
    let mut cause: &dyn std::error::Error = err;
    while let Some(source) = cause.source() {
        cause = source;
    }
    cause.to_string()
}

/// Size of the request line and configured headers as they would appear on
/// the wire for HTTP/1.1.
fn request_head_size(plan: &RequestPlan) -> usize {
    let path_len = plan.url.path().len() + plan.url.query().map_or(0, |q| q.len() + 1);
    let request_line = plan.method.as_str().len() + 1 + path_len + " HTTP/1.1\r\n".len();
    let headers: usize = plan
        .headers
        .iter()
        .map(|(name, value)| name.as_str().len() + 2 + value.as_bytes().len() + 2)
        .sum();
    request_line + headers + 2
}
