//! Emulator service: single-shot and stream runs

use crate::handler::{FunctionConfig, Handler, HandlerRegistry, ResolveError};
use crate::invocation::{InvocationEngine, InvocationRequest, DEFAULT_TIMEOUT_SECS};
use crate::render::{render_result, render_summary};
use crate::sampler::{ResourceSample, ResourceSampler};
use crate::stats::{StatsAccumulator, StreamSummary};
use crate::stream::{StreamError, StreamHarness};
use crate::timeout::TimeoutStrategy;
use lambdarun_core::{parse_event, read_to_string, ErrorKind, EventSource, ParseError, SourceError};
use serde_json::Value;
use std::io::{self, Write};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Fatal run failures. Handler failures never show up here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolve(e) => e.kind(),
            Self::Parse(e) => e.kind(),
            Self::Source(e) => e.kind(),
            Self::Stream(e) => e.kind(),
            Self::Output(_) => ErrorKind::OutputError,
        }
    }
}

/// Run settings
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Dotted path the handler was resolved from, echoed in verbose output
    pub handler_path: String,
    pub timeout_secs: u64,
    pub verbose: bool,
    pub strategy: TimeoutStrategy,
    pub function: FunctionConfig,
}

impl EmulatorConfig {
    pub fn new(handler_path: impl Into<String>) -> Self {
        Self {
            handler_path: handler_path.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            verbose: false,
            strategy: TimeoutStrategy::detect(),
            function: FunctionConfig::default(),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_strategy(mut self, strategy: TimeoutStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_function(mut self, function: FunctionConfig) -> Self {
        self.function = function;
        self
    }
}

/// Everything needed to run and report one invocation
struct Invoker {
    config: EmulatorConfig,
    handler: Arc<dyn Handler>,
    engine: InvocationEngine,
    sampler: ResourceSampler,
}

impl Invoker {
    fn execute<W: Write + ?Sized>(
        &self,
        out: &mut W,
        event: Value,
        context: Option<Value>,
    ) -> io::Result<ResourceSample> {
        let request = InvocationRequest::new(Arc::clone(&self.handler), event)
            .with_context(context)
            .with_timeout(self.config.timeout_secs);
        let outcome = self.engine.invoke(request);
        let sample = ResourceSample::new(outcome.elapsed_ms(), self.sampler.sample_delta());

        if let Some(diagnostic) = outcome.diagnostic() {
            writeln!(out, "{diagnostic}")?;
        }
        render_result(out, self.config.verbose, &self.config.handler_path, &outcome, sample)?;
        Ok(sample)
    }
}

/// Runs a handler against single events or event streams
pub struct Emulator<W: Write> {
    invoker: Invoker,
    stats: StatsAccumulator,
    out: W,
}

impl<W: Write> Emulator<W> {
    /// Build an emulator for `handler`, capturing the memory baseline now
    pub fn new(config: EmulatorConfig, handler: Arc<dyn Handler>, out: W) -> Self {
        if config.timeout_secs > DEFAULT_TIMEOUT_SECS {
            warn!(
                timeout_secs = config.timeout_secs,
                max = DEFAULT_TIMEOUT_SECS,
                "Timeout exceeds the platform maximum"
            );
        }
        info!(
            handler = %config.handler_path,
            timeout_secs = config.timeout_secs,
            strategy = config.strategy.as_str(),
            "Emulator ready"
        );

        let engine = InvocationEngine::new(config.strategy).with_function(config.function.clone());
        Self {
            invoker: Invoker {
                config,
                handler,
                engine,
                sampler: ResourceSampler::capture(),
            },
            stats: StatsAccumulator::new(),
            out,
        }
    }

    /// Resolve `config.handler_path` from `registry` and build an emulator for it
    pub fn from_registry(
        config: EmulatorConfig,
        registry: &HandlerRegistry,
        out: W,
    ) -> Result<Self, RunError> {
        let handler = registry.resolve(&config.handler_path)?;
        Ok(Self::new(config, handler, out))
    }

    /// Invoke once, record the sample and render the outcome
    pub fn execute(&mut self, event: Value, context: Option<Value>) -> Result<ResourceSample, RunError> {
        let sample = self.invoker.execute(&mut self.out, event, context)?;
        self.stats.append(sample);
        Ok(sample)
    }

    /// Single-event mode: parse the whole source as one event
    pub fn run_single(
        &mut self,
        event_source: &EventSource,
        context_source: Option<&EventSource>,
    ) -> Result<ResourceSample, RunError> {
        let context = context_source.map(load_document).transpose()?;
        let event = load_document(event_source)?;
        self.execute(event, context)
    }

    /// Stream mode: one event per line, then the summary
    pub fn run_stream(&mut self, source: &EventSource) -> Result<StreamSummary, RunError> {
        let reader = source.open()?;
        let harness = StreamHarness::new(self.invoker.config.verbose);

        let Self { invoker, stats, out } = self;
        let records = harness.run(reader, &source.label(), out, stats, |out, event| {
            invoker.execute(out, event, None)
        })?;
        info!(records, source = %source.label(), "Stream finished");

        let summary = self.stats.summarize();
        render_summary(&mut self.out, &summary)?;
        self.out.flush()?;
        Ok(summary)
    }

    pub fn stats(&self) -> &StatsAccumulator {
        &self.stats
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.invoker.config
    }

    pub fn into_sink(self) -> W {
        self.out
    }
}

fn load_document(source: &EventSource) -> Result<Value, RunError> {
    let text = read_to_string(source)?;
    Ok(parse_event(&text, &source.label())?)
}
