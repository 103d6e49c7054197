//! Immutable bombardment configuration.
//!
//! Built once (usually by the CLI layer), validated once, then only read.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::ValueEnum;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use typed_builder::TypedBuilder;
use url::Url;

pub const DEFAULT_CONNECTIONS: u64 = 125;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// How a bombardment ends: after a fixed number of requests, or after a
/// fixed wall-clock duration. Exactly one applies to any given run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationSpec {
    Counted(u64),
    Timed(Duration),
}

/// Transport variant. All three present the same capability to the engine;
/// they differ only in how the connection is driven.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ClientKind {
    /// Plain HTTP/1.1.
    #[value(name = "http1")]
    Http1,
    /// HTTP/2 where the peer negotiates it via ALPN.
    #[value(name = "http2")]
    Http2,
    /// HTTP/1.1 tuned for throughput (TCP_NODELAY, pinned idle connection).
    #[value(name = "fasthttp1")]
    FastHttp1,
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct Config {
    pub url: Url,
    #[builder(default = Method::GET)]
    pub method: Method,
    /// Inline request body. Mutually exclusive with `body_file`.
    #[builder(default)]
    pub body: Option<String>,
    #[builder(default)]
    pub body_file: Option<PathBuf>,
    /// Re-read the body source for every request instead of buffering it.
    #[builder(default = false)]
    pub stream_body: bool,
    /// Sent in order; duplicate names preserved.
    #[builder(default)]
    pub headers: Vec<(HeaderName, HeaderValue)>,
    #[builder(default = DEFAULT_CONNECTIONS)]
    pub connections: u64,
    pub termination: TerminationSpec,
    /// Cap on issued requests per second.
    #[builder(default)]
    pub rate: Option<u64>,
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,
    #[builder(default = ClientKind::FastHttp1)]
    pub client: ClientKind,
    #[builder(default = false)]
    pub insecure: bool,
    #[builder(default)]
    pub cert_path: Option<PathBuf>,
    #[builder(default)]
    pub key_path: Option<PathBuf>,
    #[builder(default = false)]
    pub print_latencies: bool,
}

impl Config {
    /// Rejects inconsistent input before any request is issued.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.connections == 0 {
            bail!("at least one connection is required");
        }
        match self.termination {
            TerminationSpec::Counted(0) => bail!("request count must be at least 1"),
            TerminationSpec::Timed(d) if d.is_zero() => bail!("duration must be positive"),
            _ => {}
        }
        if self.rate == Some(0) {
            bail!("rate must be positive");
        }
        if self.timeout.is_zero() {
            bail!("timeout must be positive");
        }
        if self.body.is_some() && self.body_file.is_some() {
            bail!("body and body file are mutually exclusive");
        }
        match self.url.scheme() {
            "http" | "https" => {}
            other => bail!("unsupported url scheme {other:?}"),
        }
        Ok(())
    }
}
