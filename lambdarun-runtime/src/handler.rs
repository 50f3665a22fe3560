//! Handler capability boundary and resolver
//!
//! A handler is untrusted code behind one contract: `(event, context) ->
//! result or failure`. Handlers are registered under dotted import-style
//! paths (`module.function`) and resolved by that path at startup.

use chrono::Utc;
use dashmap::DashMap;
use lambdarun_core::{ErrorKind, RequestId};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// The function under emulation
pub trait Handler: Send + Sync {
    fn handle(&self, event: Value, context: Context) -> anyhow::Result<Value>;
}

impl<F> Handler for F
where
    F: Fn(Value, Context) -> anyhow::Result<Value> + Send + Sync,
{
    fn handle(&self, event: Value, context: Context) -> anyhow::Result<Value> {
        self(event, context)
    }
}

/// Static description of the emulated function
#[derive(Debug, Clone)]
pub struct FunctionConfig {
    pub function_name: String,
    pub version: String,
    pub memory_size: i32,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            function_name: "lambdarun".to_string(),
            version: "$LATEST".to_string(),
            memory_size: 128,
        }
    }
}

/// Context passed to the handler alongside the event
#[derive(Debug, Clone, Serialize)]
pub struct Context {
    pub aws_request_id: String,
    pub invoked_function_arn: String,
    pub function_name: String,
    pub function_version: String,
    pub memory_limit_in_mb: i32,
    pub log_group_name: String,
    pub log_stream_name: String,
    pub timeout_secs: u64,
    pub deadline_ms: i64,
    /// Caller-supplied context document, if any
    pub client_context: Option<Value>,
}

impl Context {
    pub fn new(
        function: &FunctionConfig,
        request_id: &RequestId,
        timeout_secs: u64,
        client_context: Option<Value>,
    ) -> Self {
        let now = Utc::now();
        let timeout_ms = i64::try_from(timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX);

        Self {
            aws_request_id: request_id.to_string(),
            invoked_function_arn: format!(
                "arn:aws:lambda:us-east-1:000000000000:function:{}:{}",
                function.function_name, function.version
            ),
            function_name: function.function_name.clone(),
            function_version: function.version.clone(),
            memory_limit_in_mb: function.memory_size,
            log_group_name: format!("/aws/lambda/{}", function.function_name),
            log_stream_name: format!(
                "{}/[{}]{}",
                now.format("%Y/%m/%d"),
                function.version,
                request_id.short()
            ),
            timeout_secs,
            deadline_ms: now.timestamp_millis().saturating_add(timeout_ms),
            client_context,
        }
    }

    /// Get remaining time in milliseconds
    pub fn get_remaining_time_in_millis(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        (self.deadline_ms - now).max(0)
    }

    /// Long-running handlers may poll this to stop early once the deadline passed.
    pub fn is_expired(&self) -> bool {
        self.get_remaining_time_in_millis() == 0
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{}", malformed_message(.path, .suggestion))]
    MalformedPath {
        path: String,
        suggestion: Option<String>,
    },

    #[error("Oops! There was a problem finding your function `{0}`. Ensure it is registered with a signature like `fn handler(event, context)`.")]
    NotFound(String),
}

fn malformed_message(path: &str, suggestion: &Option<String>) -> String {
    const FORM: &str = "This must be an import path, following the form of \
                        [module 1].[module 2...n].[function]";
    let mut message = if path.contains(['/', '\\']) {
        format!("It looks like you've given a file path as the handler argument ({path}). {FORM}")
    } else {
        format!("The handler path `{path}` is malformed. {FORM}")
    };
    if let Some(s) = suggestion {
        message.push_str(&format!("\nPerhaps it is something like `{s}`?"));
    }
    message
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ResolutionError
    }
}

/// Check that `path` has the `module[.module...].function` shape
pub fn validate_path(path: &str) -> Result<(), ResolveError> {
    if path.contains('/') || path.contains('\\') {
        let suggestion = path
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        return Err(ResolveError::MalformedPath {
            path: path.to_string(),
            suggestion,
        });
    }

    let segments: Vec<&str> = path.split('.').collect();
    let well_formed = segments.len() >= 2
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_'));
    if !well_formed {
        return Err(ResolveError::MalformedPath {
            path: path.to_string(),
            suggestion: None,
        });
    }

    Ok(())
}

/// Handlers addressable by dotted path
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one at the same path
    pub fn register<H>(&self, path: &str, handler: H) -> Result<(), ResolveError>
    where
        H: Handler + 'static,
    {
        validate_path(path)?;
        self.handlers.insert(path.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Resolve a dotted path to its handler
    pub fn resolve(&self, path: &str) -> Result<Arc<dyn Handler>, ResolveError> {
        validate_path(path)?;
        self.handlers
            .get(path)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| ResolveError::NotFound(path.to_string()))
    }

    /// All registered paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.handlers.iter().map(|r| r.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
