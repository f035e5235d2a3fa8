//! Worker configuration
//!
//! Every option can be given on the command line or through the matching
//! `PREDICT_*` environment variable.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use inference_engine::CacheMode;

use crate::pipeline::DEFAULT_CONCURRENCY;
use crate::transport::TopicAddr;

/// Streaming classifier worker
///
/// Reads JSON records from the input topic, scores them with the model in
/// the checkpoint directory and publishes one result per record.
///
/// Topics are `-`/`stdio` or `tcp://host:port/topic`.
#[derive(Parser, Debug, Clone)]
#[command(name = "predict-service")]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Topic to read input records from
    #[arg(long, env = "PREDICT_INPUT")]
    pub input: TopicAddr,

    /// Topic to publish prediction results to
    #[arg(long, env = "PREDICT_OUTPUT")]
    pub output: TopicAddr,

    /// Checkpoint directory of the model
    #[arg(long, env = "PREDICT_MODEL")]
    pub model: PathBuf,

    /// Topic receiving records that failed to decode or score
    #[arg(long, env = "PREDICT_DEAD_LETTER")]
    pub dead_letter: Option<TopicAddr>,

    /// Records processed concurrently
    #[arg(long, env = "PREDICT_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY, value_parser = positive::<usize>)]
    pub concurrency: usize,

    /// Upper bound on a single prediction, in milliseconds
    #[arg(long, env = "PREDICT_TIMEOUT_MS", value_parser = positive::<u64>)]
    pub predict_timeout_ms: Option<u64>,

    /// How loaded engines are cached
    #[arg(long, env = "PREDICT_CACHE_MODE", value_enum, default_value_t = CacheModeArg::Process)]
    pub cache_mode: CacheModeArg,

    /// Defer loading the model until the first record arrives
    #[arg(long, env = "PREDICT_LAZY_LOAD")]
    pub lazy_load: bool,

    /// Log output format
    #[arg(long, env = "PREDICT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Address for the Prometheus scrape endpoint
    #[arg(long, env = "PREDICT_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheModeArg {
    /// One model per process, whatever checkpoint is requested
    Process,
    /// One model per checkpoint path
    PerCheckpoint,
}

impl From<CacheModeArg> for CacheMode {
    fn from(arg: CacheModeArg) -> Self {
        match arg {
            CacheModeArg::Process => Self::Process,
            CacheModeArg::PerCheckpoint => Self::PerCheckpoint,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    pub fn predict_timeout(&self) -> Option<Duration> {
        self.predict_timeout_ms.map(Duration::from_millis)
    }
}

fn positive<T>(raw: &str) -> Result<T, String>
where
    T: FromStr + PartialEq + Default,
    T::Err: Display,
{
    let value: T = raw.parse().map_err(|e: T::Err| e.to_string())?;
    if value == T::default() {
        return Err("must be greater than zero".to_string());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(std::iter::once("predict-service").chain(args.iter().copied()))
    }

    #[test]
    fn test_minimal_arguments() {
        let config = parse(&["--input", "-", "--output", "stdio", "--model", "/models/mnist"]).unwrap();
        assert_eq!(config.input, TopicAddr::Stdio);
        assert_eq!(config.output, TopicAddr::Stdio);
        assert_eq!(config.model, PathBuf::from("/models/mnist"));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.cache_mode, CacheModeArg::Process);
        assert_eq!(config.predict_timeout(), None);
        assert!(!config.lazy_load);
    }

    #[test]
    fn test_full_arguments() {
        let config = parse(&[
            "--input",
            "tcp://broker:9700/images",
            "--output",
            "tcp://broker:9700/predictions",
            "--dead-letter",
            "tcp://broker:9700/failed",
            "--model",
            "/models/mnist",
            "--concurrency",
            "16",
            "--predict-timeout-ms",
            "250",
            "--cache-mode",
            "per-checkpoint",
            "--lazy-load",
            "--log-format",
            "json",
            "--metrics-addr",
            "127.0.0.1:9100",
        ])
        .unwrap();

        assert_eq!(config.concurrency, 16);
        assert_eq!(config.predict_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(CacheMode::from(config.cache_mode), CacheMode::PerCheckpoint);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.lazy_load);
        assert!(config.dead_letter.is_some());
        assert!(config.metrics_addr.is_some());
    }

    #[test]
    fn test_rejects_missing_and_invalid_values() {
        assert!(parse(&["--input", "-", "--output", "-"]).is_err());
        assert!(parse(&["--input", "ftp://x:1/y", "--output", "-", "--model", "m"]).is_err());
        assert!(parse(&["--input", "-", "--output", "-", "--model", "m", "--concurrency", "0"]).is_err());
        assert!(parse(&[
            "--input", "-", "--output", "-", "--model", "m", "--predict-timeout-ms", "0"
        ])
        .is_err());
    }
}
