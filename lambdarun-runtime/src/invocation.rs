//! Lambda invocation handling
//!
//! The engine is the single place where handler failures are caught. Every
//! outcome, expected or not, leaves here as an [`InvocationOutcome`]; nothing
//! the handler does propagates past it.

use crate::handler::{Context, FunctionConfig, Handler};
use crate::timeout::{GuardError, TimeoutGuard, TimeoutStrategy};
use lambdarun_core::{ErrorKind, RequestId};
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info_span, warn};

/// Platform maximum, used when no timeout is configured
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Elapsed time reported for invocations without a valid timing sample
pub const SENTINEL_ELAPSED_MS: f64 = -1.0;

pub const TIMEOUT_MARKER: &str = "TIMEOUT";
pub const HANDLER_ERROR_MARKER: &str = "LAMBDA ERROR";

/// One handler call
pub struct InvocationRequest {
    pub handler: Arc<dyn Handler>,
    pub event: Value,
    pub context: Option<Value>,
    pub timeout_secs: u64,
}

impl InvocationRequest {
    pub fn new(handler: Arc<dyn Handler>, event: Value) -> Self {
        Self {
            handler,
            event,
            context: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_context(mut self, context: Option<Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Classified result of one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Success { result: Value, elapsed_ms: f64 },
    Timeout { timeout_secs: u64 },
    HandlerError { trace: String },
}

impl InvocationOutcome {
    /// Handler time in ms, or [`SENTINEL_ELAPSED_MS`] for failed invocations
    pub fn elapsed_ms(&self) -> f64 {
        match self {
            Self::Success { elapsed_ms, .. } => *elapsed_ms,
            Self::Timeout { .. } | Self::HandlerError { .. } => SENTINEL_ELAPSED_MS,
        }
    }

    /// The handler's value, or the marker standing in for it
    pub fn result(&self) -> Value {
        match self {
            Self::Success { result, .. } => result.clone(),
            Self::Timeout { .. } => Value::String(TIMEOUT_MARKER.to_string()),
            Self::HandlerError { .. } => Value::String(HANDLER_ERROR_MARKER.to_string()),
        }
    }

    /// `(result_or_marker, elapsed_ms)`
    pub fn into_parts(self) -> (Value, f64) {
        let elapsed = self.elapsed_ms();
        match self {
            Self::Success { result, .. } => (result, elapsed),
            other => (other.result(), elapsed),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Timeout { .. } => Some(ErrorKind::TimeoutError),
            Self::HandlerError { .. } => Some(ErrorKind::HandlerError),
        }
    }

    /// Notice printed for failed invocations
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::Timeout { timeout_secs } => {
                Some(format!("Your lambda timed out! (Timeout was {timeout_secs}s)\n"))
            }
            Self::HandlerError { trace } => Some(format!(
                "\nThere was an error running your function. Ensure it has a signature like \
                 `fn handler(event, context)`.\n\n{trace}"
            )),
        }
    }
}

/// Why a handler body failed
#[derive(Debug)]
enum BodyFailure {
    Error(String),
    Panic(String),
}

impl std::fmt::Display for BodyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(trace) => write!(f, "Error: {trace}"),
            Self::Panic(message) => write!(f, "Handler panicked: {message}"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Drives handler calls through the timeout guard
#[derive(Debug, Clone)]
pub struct InvocationEngine {
    strategy: TimeoutStrategy,
    function: FunctionConfig,
}

impl Default for InvocationEngine {
    fn default() -> Self {
        Self::new(TimeoutStrategy::detect())
    }
}

impl InvocationEngine {
    pub fn new(strategy: TimeoutStrategy) -> Self {
        Self {
            strategy,
            function: FunctionConfig::default(),
        }
    }

    pub fn with_function(mut self, function: FunctionConfig) -> Self {
        self.function = function;
        self
    }

    pub fn strategy(&self) -> TimeoutStrategy {
        self.strategy
    }

    /// Invoke a handler. Never fails and never panics on behalf of the handler.
    pub fn invoke(&self, request: InvocationRequest) -> InvocationOutcome {
        let InvocationRequest {
            handler,
            event,
            context,
            timeout_secs,
        } = request;

        let request_id = RequestId::new();
        let span = info_span!(
            "invoke",
            request_id = %request_id,
            function = %self.function.function_name,
            timeout_secs
        );
        let _enter = span.enter();

        let context = Context::new(&self.function, &request_id, timeout_secs, context);
        let guard = TimeoutGuard::new(self.strategy, timeout_secs);

        let guarded = panic::catch_unwind(AssertUnwindSafe(|| {
            guard.call(move || {
                let start = Instant::now();
                let body = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event, context)));
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

                match body {
                    Ok(Ok(result)) => Ok((result, elapsed_ms)),
                    Ok(Err(err)) => Err(BodyFailure::Error(format!("{err:?}"))),
                    Err(payload) => Err(BodyFailure::Panic(panic_message(&*payload))),
                }
            })
        }));

        match guarded {
            Ok(Ok((result, elapsed_ms))) => {
                debug!(elapsed_ms, "Invocation succeeded");
                InvocationOutcome::Success { result, elapsed_ms }
            }
            Ok(Err(GuardError::Timeout(_))) => {
                warn!("Invocation timed out");
                InvocationOutcome::Timeout { timeout_secs }
            }
            Ok(Err(GuardError::Failed(failure))) => {
                error!(failure = %failure, "Invocation failed");
                InvocationOutcome::HandlerError {
                    trace: failure.to_string(),
                }
            }
            Ok(Err(guard_error)) => {
                error!(error = %guard_error, "Invocation could not be guarded");
                InvocationOutcome::HandlerError {
                    trace: guard_error.to_string(),
                }
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(panic = %message, "Timeout guard panicked");
                InvocationOutcome::HandlerError {
                    trace: format!("Handler panicked: {message}"),
                }
            }
        }
    }
}
