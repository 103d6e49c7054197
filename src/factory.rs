//! Request factories: where the next request to fire comes from.
//!
//! Every worker owns one factory and asks it for a fresh
//! (method, url, headers, body) tuple before each call. The fixed factory
//! hands back the configured request forever; the dynamic one derives a new
//! method, path and body per call from a caller-supplied producer, which is
//! the seam an embedded scripting runtime plugs into. Producers are usually
//! stateful and rarely thread-safe, so the orchestrator mints one factory per
//! worker from a shared [`FactorySource`] instead of locking a single one.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

/// Where the request body comes from, chosen per call.
#[derive(Clone, Debug)]
pub enum BodySource {
    /// Literal bytes, reused across calls.
    Bytes(Bytes),
    /// A file streamed from a fresh handle on every call.
    File(PathBuf),
}

impl BodySource {
    pub fn empty() -> Self {
        BodySource::Bytes(Bytes::new())
    }
}

/// One fully-specified request, ready for the client to serialize.
#[derive(Clone, Debug)]
pub struct RequestPlan {
    pub method: Method,
    pub url: Url,
    /// Sent in order; duplicate names are preserved.
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: BodySource,
}

pub trait RequestFactory: Send + Sync {
    /// Produces the next request. `seq` is the global call index across all
    /// workers.
    fn next(&mut self, seq: u64) -> RequestPlan;
}

/// Mints one factory per worker.
pub type FactorySource = Arc<dyn Fn() -> Box<dyn RequestFactory> + Send + Sync>;

/// Returns the configured request on every call.
pub struct FixedFactory {
    plan: RequestPlan,
}

impl FixedFactory {
    pub fn new(plan: RequestPlan) -> Self {
        Self { plan }
    }
}

impl RequestFactory for FixedFactory {
    fn next(&mut self, _seq: u64) -> RequestPlan {
        self.plan.clone()
    }
}

/// One produced call of a dynamic request source.
pub struct DynamicCall {
    pub method: Method,
    pub path: String,
    pub body: Vec<u8>,
}

/// Derives method, path and body per call from a producer closure and joins
/// the returned path against the configured base URL.
pub struct DynamicFactory {
    base: Url,
    headers: Vec<(HeaderName, HeaderValue)>,
    produce: Box<dyn FnMut(u64) -> DynamicCall + Send + Sync>,
}

impl DynamicFactory {
    pub fn new(
        base: Url,
        headers: Vec<(HeaderName, HeaderValue)>,
        produce: Box<dyn FnMut(u64) -> DynamicCall + Send + Sync>,
    ) -> Self {
        Self {
            base,
            headers,
            produce,
        }
    }
}

impl RequestFactory for DynamicFactory {
    fn next(&mut self, seq: u64) -> RequestPlan {
        let call = (self.produce)(seq);
        let url = match self.base.join(&call.path) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!("produced path {:?} does not join the base url: {err}", call.path);
                self.base.clone()
            }
        };
        RequestPlan {
            method: call.method,
            url,
            headers: self.headers.clone(),
            body: BodySource::Bytes(Bytes::from(call.body)),
        }
    }
}
