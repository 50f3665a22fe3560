//! Local function invocation runtime for lambdarun
//!
//! Runs a handler against an event with an enforced deadline, measures
//! wall-clock time and peak memory, and drives line-delimited event streams
//! with aggregated statistics.

pub mod handler;
pub mod invocation;
pub mod render;
pub mod sampler;
pub mod service;
pub mod stats;
pub mod stream;
pub mod timeout;

pub use handler::{Context, FunctionConfig, Handler, HandlerRegistry, ResolveError};
pub use invocation::{InvocationEngine, InvocationOutcome, InvocationRequest, DEFAULT_TIMEOUT_SECS};
pub use sampler::{ResourceSample, ResourceSampler};
pub use service::{Emulator, EmulatorConfig, RunError};
pub use stats::{billing_bucket, StatsAccumulator, StreamSummary};
pub use stream::{StreamError, StreamHarness};
pub use timeout::{GuardError, TimeoutGuard, TimeoutStrategy};
