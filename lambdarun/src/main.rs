//! lambdarun - local function emulator
//!
//! Runs a handler against a JSON event (or a line-delimited stream of them)
//! with an enforced timeout, and reports wall-clock time, billing bucket and
//! peak memory.

mod builtin;
mod config;

use clap::Parser;
use lambdarun_core::EventSource;
use lambdarun_runtime::{Emulator, EmulatorConfig, HandlerRegistry, RunError, TimeoutStrategy};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lambdarun")]
#[command(about = "Run a function handler locally against JSON events", long_about = None)]
struct Args {
    /// Handler path, e.g. example.echo_key1
    #[arg(required_unless_present = "list_handlers")]
    handler: Option<String>,

    /// JSON event file, or `-` to read from stdin
    #[arg(required_unless_present = "list_handlers")]
    event_file: Option<String>,

    /// Optional JSON context file
    context_file: Option<String>,

    /// Treat the event file as line-delimited JSON, one event per line
    #[arg(short, long)]
    stream: bool,

    /// Invocation timeout in seconds (default 300)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Print profiling details for each invocation
    #[arg(short, long)]
    verbose: bool,

    /// Timeout strategy: auto, preemptive or ticker
    #[arg(long)]
    timeout_strategy: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LAMBDARUN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Configuration file (default: ./lambdarun.toml if present)
    #[arg(long, env = "LAMBDARUN_CONFIG")]
    config: Option<PathBuf>,

    /// List built-in handlers and exit
    #[arg(long)]
    list_handlers: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let settings = config::Config::load(args.config.as_deref())?;

    // Initialize tracing
    let log_level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("lambdarun={log_level},lambdarun_runtime={log_level},lambdarun_core={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let registry = builtin::registry()?;
    if args.list_handlers {
        let mut out = io::stdout().lock();
        for path in registry.paths() {
            writeln!(out, "{path}")?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    let (Some(handler_path), Some(event_file)) = (args.handler.clone(), args.event_file.clone()) else {
        anyhow::bail!("a handler path and an event file are required");
    };

    let requested = args
        .timeout_strategy
        .as_deref()
        .unwrap_or(&settings.invocation.timeout_strategy);
    let strategy = requested.parse::<TimeoutStrategy>().unwrap_or_else(|_| {
        warn!("Unknown timeout strategy '{}', defaulting to auto", requested);
        TimeoutStrategy::detect()
    });

    let timeout_secs = args.timeout.unwrap_or(settings.invocation.timeout);

    let emulator_config = EmulatorConfig::new(handler_path)
        .with_timeout(timeout_secs)
        .with_verbose(args.verbose || settings.invocation.verbose)
        .with_strategy(strategy)
        .with_function(settings.function.to_function_config());

    info!(
        "Starting lambdarun (handler: {}, timeout: {}s, strategy: {})",
        emulator_config.handler_path,
        timeout_secs,
        strategy.as_str()
    );

    match run(&args, emulator_config, &registry, &event_file) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            error!(kind = %err.kind(), "{}", err);
            println!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run(
    args: &Args,
    config: EmulatorConfig,
    registry: &HandlerRegistry,
    event_file: &str,
) -> Result<(), RunError> {
    // Unlocked handle: handlers on worker threads may print too.
    let mut emulator = Emulator::from_registry(config, registry, io::stdout())?;
    let events = EventSource::parse(event_file);

    if args.stream {
        if args.context_file.is_some() {
            warn!("Context file is ignored in stream mode");
        }
        emulator.run_stream(&events)?;
    } else {
        let context = args.context_file.as_deref().map(EventSource::parse);
        emulator.run_single(&events, context.as_ref())?;
    }
    Ok(())
}
