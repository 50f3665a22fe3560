//! Configuration management

use lambdarun_runtime::{FunctionConfig, DEFAULT_TIMEOUT_SECS};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub invocation: InvocationConfig,

    #[serde(default)]
    pub function: FunctionSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct InvocationConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_strategy")]
    pub timeout_strategy: String,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            verbose: false,
            timeout_strategy: default_strategy(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FunctionSection {
    #[serde(default = "default_function_name")]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: i32,
}

impl Default for FunctionSection {
    fn default() -> Self {
        Self {
            name: default_function_name(),
            version: default_version(),
            memory_limit_mb: default_memory_limit(),
        }
    }
}

impl FunctionSection {
    pub fn to_function_config(&self) -> FunctionConfig {
        FunctionConfig {
            function_name: self.name.clone(),
            version: self.version.clone(),
            memory_size: self.memory_limit_mb,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_strategy() -> String {
    "auto".to_string()
}

fn default_function_name() -> String {
    FunctionConfig::default().function_name
}

fn default_version() -> String {
    FunctionConfig::default().version
}

fn default_memory_limit() -> i32 {
    FunctionConfig::default().memory_size
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Without `path`, an optional `lambdarun.toml` in the working directory is
    /// read. Environment variables such as `LAMBDARUN_INVOCATION__TIMEOUT`
    /// override file values.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("lambdarun").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("LAMBDARUN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }
}
