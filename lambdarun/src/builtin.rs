//! Demonstration handlers shipped with the binary
//!
//! Registered under `example.*` so the emulator can be tried without writing
//! any code: `lambdarun example.echo_key1 event.json`.

use anyhow::Context as _;
use lambdarun_runtime::{Context, HandlerRegistry, ResolveError};
use serde_json::{json, Value};
use std::thread;
use std::time::Duration;

const DEFAULT_ALLOCATION: u64 = 1024 * 1024;
const DEFAULT_BALLAST: u64 = 16 * 1024 * 1024;
const DEFAULT_SLEEP_MS: u64 = 3000;

/// Registry with every built-in handler
pub fn registry() -> Result<HandlerRegistry, ResolveError> {
    let registry = HandlerRegistry::new();
    registry.register("example.echo", echo)?;
    registry.register("example.echo_key1", echo_key1)?;
    registry.register("example.sleep", sleep)?;
    registry.register("example.fail", fail)?;
    registry.register("example.allocate", allocate)?;
    registry.register("example.example_handler", example_handler)?;
    Ok(registry)
}

fn echo(event: Value, _context: Context) -> anyhow::Result<Value> {
    Ok(event)
}

fn echo_key1(event: Value, _context: Context) -> anyhow::Result<Value> {
    Ok(event["key1"].clone())
}

/// Sleeps `event.seconds` (default 1)
fn sleep(event: Value, _context: Context) -> anyhow::Result<Value> {
    let seconds = event["seconds"].as_f64().unwrap_or(1.0);
    let duration = Duration::try_from_secs_f64(seconds)
        .with_context(|| format!("invalid sleep duration: {seconds}"))?;
    thread::sleep(duration);
    Ok(json!({ "slept": seconds }))
}

fn fail(event: Value, _context: Context) -> anyhow::Result<Value> {
    let message = event["message"].as_str().unwrap_or("example failure");
    anyhow::bail!("{message}")
}

/// Touches `event.bytes` (default 1 MiB) of fresh memory
fn allocate(event: Value, _context: Context) -> anyhow::Result<Value> {
    let bytes = event["bytes"].as_u64().unwrap_or(DEFAULT_ALLOCATION);
    let buffer = filled(bytes)?;
    Ok(json!({ "allocated": buffer.len() }))
}

/// Grows a 512 KiB buffer line by line, allocates `event.ballast_bytes`,
/// sleeps `event.sleep_ms`, then echoes `key1`
fn example_handler(event: Value, context: Context) -> anyhow::Result<Value> {
    let mut accumulator = String::new();
    for _ in 0..512 {
        accumulator.push_str(&"f".repeat(1024));
        accumulator.push('\n');
    }

    let ballast = filled(event["ballast_bytes"].as_u64().unwrap_or(DEFAULT_BALLAST))?;
    drop(ballast);

    let sleep_ms = event["sleep_ms"].as_u64().unwrap_or(DEFAULT_SLEEP_MS);
    if !context.is_expired() {
        thread::sleep(Duration::from_millis(sleep_ms));
    }

    Ok(event["key1"].clone())
}

fn filled(bytes: u64) -> anyhow::Result<Vec<u8>> {
    let len = usize::try_from(bytes).with_context(|| format!("cannot allocate {bytes} bytes"))?;
    Ok(vec![1u8; len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambdarun_core::RequestId;
    use lambdarun_runtime::{FunctionConfig, Handler};

    fn context() -> Context {
        Context::new(&FunctionConfig::default(), &RequestId::new(), 5, None)
    }

    fn call(path: &str, event: Value) -> anyhow::Result<Value> {
        registry().unwrap().resolve(path).unwrap().handle(event, context())
    }

    #[test]
    fn test_registry_paths() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), 6);
        assert!(registry.paths().iter().all(|p| p.starts_with("example.")));
    }

    #[test]
    fn test_echo_handlers() {
        assert_eq!(call("example.echo", json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert_eq!(
            call("example.echo_key1", json!({"key1": "hello", "key2": "world"})).unwrap(),
            json!("hello")
        );
        assert_eq!(call("example.echo_key1", json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn test_sleep_handler() {
        assert_eq!(call("example.sleep", json!({"seconds": 0.01})).unwrap(), json!({"slept": 0.01}));
        assert!(call("example.sleep", json!({"seconds": -1})).is_err());
    }

    #[test]
    fn test_fail_handler() {
        let err = call("example.fail", json!({"message": "boom"})).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_allocate_handler() {
        assert_eq!(call("example.allocate", json!({"bytes": 4096})).unwrap(), json!({"allocated": 4096}));
    }

    #[test]
    fn test_example_handler() {
        let event = json!({"key1": "value1", "ballast_bytes": 1024, "sleep_ms": 0});
        assert_eq!(call("example.example_handler", event).unwrap(), json!("value1"));
    }
}
