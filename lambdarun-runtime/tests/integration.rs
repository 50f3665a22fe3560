//! Integration tests for the emulator
//!
//! These tests drive whole runs through `Emulator` and check the rendered output.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lambdarun_core::{ErrorKind, EventSource};
use lambdarun_runtime::{
    Context, Emulator, EmulatorConfig, HandlerRegistry, RunError, TimeoutGuard, TimeoutStrategy,
};
use parking_lot::{Mutex, MutexGuard};
use serde_json::{json, Value};
use tempfile::NamedTempFile;

static DEADLINE_TESTS: Mutex<()> = parking_lot::const_mutex(());

/// Run deadline-sensitive tests one at a time, after any abandoned handler has exited
fn serial() -> MutexGuard<'static, ()> {
    let serial = DEADLINE_TESTS.lock();
    // An unbounded guarded call only starts once the previous worker is gone.
    let _ = TimeoutGuard::new(TimeoutStrategy::Preemptive, u64::MAX).call(|| Ok::<_, ()>(()));
    serial
}

fn echo_key1(event: Value, _context: Context) -> anyhow::Result<Value> {
    Ok(event["key1"].clone())
}

fn echo_foo(event: Value, _context: Context) -> anyhow::Result<Value> {
    match event.get("foo") {
        Some(foo) => Ok(foo.clone()),
        None => anyhow::bail!("event has no `foo` key"),
    }
}

fn sleepy(_event: Value, _context: Context) -> anyhow::Result<Value> {
    std::thread::sleep(Duration::from_secs(3));
    Ok(json!("woke up"))
}

fn registry() -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    registry.register("tests.echo_key1", echo_key1).unwrap();
    registry.register("tests.echo_foo", echo_foo).unwrap();
    registry.register("tests.sleepy", sleepy).unwrap();
    registry
}

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn source(file: &NamedTempFile) -> EventSource {
    EventSource::File(PathBuf::from(file.path()))
}

fn emulator(config: EmulatorConfig) -> Emulator<Vec<u8>> {
    Emulator::from_registry(config, &registry(), Vec::new()).unwrap()
}

fn output(emulator: Emulator<Vec<u8>>) -> String {
    String::from_utf8(emulator.into_sink()).unwrap()
}

#[test]
fn test_single_event_prints_result() {
    let event = write_temp(r#"{"key1": "hello", "key2": "world"}"#);
    let mut emulator = emulator(EmulatorConfig::new("tests.echo_key1").with_timeout(30));

    let sample = emulator.run_single(&source(&event), None).unwrap();
    assert!(sample.clock_ms >= 0.0);
    assert_eq!(output(emulator), "hello\n");
}

#[test]
fn test_single_event_with_context_file() {
    let inspect = |_event: Value, context: Context| -> anyhow::Result<Value> {
        Ok(context.client_context.unwrap_or(Value::Null))
    };
    let event = write_temp("{}");
    let context = write_temp(r#"{"tenant": "acme"}"#);
    let mut emulator = Emulator::new(EmulatorConfig::new("tests.inspect"), Arc::new(inspect), Vec::new());

    emulator.run_single(&source(&event), Some(&source(&context))).unwrap();
    assert_eq!(output(emulator), "{\"tenant\":\"acme\"}\n");
}

#[test]
fn test_single_event_verbose() {
    let event = write_temp(r#"{"key1": "hello"}"#);
    let mut emulator = emulator(EmulatorConfig::new("tests.echo_key1").with_verbose(true));

    emulator.run_single(&source(&event), None).unwrap();
    let text = output(emulator);
    assert!(text.starts_with("Executed tests.echo_key1\nEstimated...\n"));
    assert!(text.contains("ms billing bucket)\n"));
    assert!(text.contains("...execution peak RSS memory:\t\t "));
    assert!(text.ends_with("----------------------RESULT----------------------\nhello\n"));
}

#[test]
fn test_timeout_reports_sentinel() {
    let _serial = serial();
    let event = write_temp("{}");
    let config = EmulatorConfig::new("tests.sleepy")
        .with_timeout(1)
        .with_strategy(TimeoutStrategy::Preemptive);
    let mut emulator = emulator(config);

    let sample = emulator.run_single(&source(&event), None).unwrap();
    assert_eq!(sample.clock_ms, -1.0);
    let text = output(emulator);
    assert!(text.contains("Your lambda timed out! (Timeout was 1s)"));
    assert!(text.ends_with("TIMEOUT\n"));
}

#[test]
fn test_stream_records_never_overlap_after_timeout() {
    let _serial = serial();
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let (now, peak) = (Arc::clone(&active), Arc::clone(&max_active));
    let tracked = move |event: Value, _context: Context| -> anyhow::Result<Value> {
        let running = now.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(running, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(event["ms"].as_u64().unwrap_or(0)));
        now.fetch_sub(1, Ordering::SeqCst);
        Ok(event["ms"].clone())
    };

    let stream = write_temp("{\"ms\":1200}\n{\"ms\":200}\n");
    let config = EmulatorConfig::new("tests.tracked")
        .with_timeout(1)
        .with_strategy(TimeoutStrategy::Preemptive);
    let mut emulator = Emulator::new(config, Arc::new(tracked), Vec::new());

    let summary = emulator.run_stream(&source(&stream)).unwrap();
    assert_eq!(summary.samples, 2);
    // The second record waits for the abandoned first one, then fits its own deadline.
    assert_eq!(summary.valid_samples, 1);
    assert_eq!(emulator.stats().clock()[0], -1.0);
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    assert!(output(emulator).starts_with("Your lambda timed out! (Timeout was 1s)\n\nTIMEOUT\n200\n"));
}

#[test]
fn test_stream_summary() {
    let stream = write_temp("{\"foo\":\"bar\"}\n{\"foo\":\"baz\"}\n");
    let mut emulator = emulator(EmulatorConfig::new("tests.echo_foo"));

    let summary = emulator.run_stream(&source(&stream)).unwrap();
    assert_eq!(summary.samples, 2);
    assert!(!summary.sentinels_removed);

    let text = output(emulator);
    assert!(text.starts_with("bar\nbaz\n"));
    assert!(text.contains("\nSummary profile from stream execution:\nSamples: 2\nClock time:\n"));
    assert!(text.contains("Peak resident set size (memory):\n\tMin: "));
    assert!(!text.contains("ERRORS DETECTED"));
}

#[test]
fn test_stream_verbose_narration() {
    let stream = write_temp("{\"foo\":\"bar\"}\n");
    let mut emulator = emulator(EmulatorConfig::new("tests.echo_foo").with_verbose(true));

    emulator.run_stream(&source(&stream)).unwrap();
    let text = output(emulator);
    assert!(text.starts_with("Entering stream mode.\n\nObject 1 {\"foo\":\"bar\"}\nExecuted tests.echo_foo\n"));
}

#[test]
fn test_stream_handler_error_does_not_abort() {
    let stream = write_temp("{\"foo\":1}\n{\"nope\":2}\n{\"foo\":3}\n");
    let mut emulator = emulator(EmulatorConfig::new("tests.echo_foo"));

    let summary = emulator.run_stream(&source(&stream)).unwrap();
    assert_eq!(summary.samples, 3);
    assert_eq!(summary.valid_samples, 2);
    assert!(summary.sentinels_removed);
    assert_eq!(emulator.stats().clock()[1], -1.0);

    let text = output(emulator);
    assert!(text.contains("event has no `foo` key"));
    assert!(text.contains("LAMBDA ERROR\n3\n"));
    assert!(text.contains("(ERRORS DETECTED: Removing timing samples from aborted invocations.)\nNew sample size: 2\n"));
}

#[test]
fn test_stream_parse_error_aborts() {
    let stream = write_temp("{\"foo\":1}\n{broken\n{\"foo\":3}\n");
    let mut emulator = emulator(EmulatorConfig::new("tests.echo_foo"));

    let err = emulator.run_stream(&source(&stream)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParseError);
    assert!(err.to_string().contains("line 2"));
    assert_eq!(emulator.stats().len(), 1);

    let text = output(emulator);
    assert_eq!(text, "1\n");
}

#[test]
fn test_missing_event_file() {
    let mut emulator = emulator(EmulatorConfig::new("tests.echo_key1"));
    let missing = EventSource::File(PathBuf::from("/nonexistent/lambdarun/event.json"));

    let err = emulator.run_single(&missing, None).unwrap_err();
    assert!(matches!(err, RunError::Source(_)));
    assert!(err.kind().is_fatal());
    assert!(emulator.stats().is_empty());
}

#[test]
fn test_malformed_event_file() {
    let event = write_temp("{\"key1\": ");
    let mut emulator = emulator(EmulatorConfig::new("tests.echo_key1"));

    let err = emulator.run_single(&source(&event), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParseError);
    assert!(err.to_string().starts_with("There was a problem parsing your JSON event"));
}

#[test]
fn test_unresolvable_handler() {
    let err = Emulator::from_registry(EmulatorConfig::new("tests/echo_key1"), &registry(), Vec::new())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::ResolutionError);
    assert!(err.to_string().contains("file path"));
}
