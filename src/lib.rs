pub mod barrier;
pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod factory;
pub mod histogram;
pub mod limiter;
pub mod metrics;
pub mod progress;
pub mod report;
pub mod tls;

pub use barrier::{CompletionBarrier, DoneSignal};
pub use client::{Client, Outcome};
pub use config::{ClientKind, Config, TerminationSpec};
pub use engine::Barrage;
pub use errors::ErrorAggregator;
pub use factory::{BodySource, DynamicCall, DynamicFactory, FactorySource, FixedFactory, RequestFactory, RequestPlan};
pub use histogram::{FloatHistogram, UintHistogram};
pub use limiter::{Pace, RateLimiter};
pub use progress::ProgressSink;
pub use report::Summary;
