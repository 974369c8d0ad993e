//! Tracing setup for a host process embedding this engine.
//!
//! `TracingConfig::init` builds and installs the global subscriber a UCI
//! front-end or self-play driver needs: plain-text or JSON formatting on
//! stdout, plus an optional daily-rotating file sink via `tracing-appender`.
//! The returned `WorkerGuard` must be kept alive for the process lifetime —
//! dropping it early stops the background writer thread and truncates the
//! file sink.
//!
//! Instrumented call sites in `search` use `tracing::{debug, warn}` at the
//! decision points a host would want visibility into: the tree-size cap
//! being reached and the resignation filter firing.

use std::io;
use std::path::PathBuf;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    PlainText,
    Json,
}

pub struct FileLogConfig {
    pub directory: PathBuf,
    pub prefix: String,
}

impl FileLogConfig {
    fn prepare_writer(&self) -> (NonBlocking, WorkerGuard) {
        let file_appender = rolling::daily(&self.directory, &self.prefix);
        tracing_appender::non_blocking(file_appender)
    }
}

pub struct TracingConfig {
    pub default_level: String,
    pub format: LogFormat,
    pub file_log: Option<FileLogConfig>,
}

impl TracingConfig {
    /// Installs a global subscriber built from this config. Returns the
    /// `WorkerGuard` for the file sink when `file_log` is set; the caller
    /// must hold onto it for as long as logging is needed.
    pub fn init(self) -> Option<WorkerGuard> {
        let env_filter =
            EnvFilter::try_new(&self.default_level).unwrap_or_else(|_| EnvFilter::new("info"));
        let base_registry = Registry::default().with(env_filter);

        match self.file_log {
            None => {
                match self.format {
                    LogFormat::PlainText => {
                        base_registry.with(fmt::layer().with_writer(io::stdout)).init();
                    }
                    LogFormat::Json => {
                        base_registry
                            .with(fmt::layer().json().with_writer(io::stdout))
                            .init();
                    }
                }
                None
            }
            Some(file_cfg) => {
                let (non_blocking, guard) = file_cfg.prepare_writer();
                match self.format {
                    LogFormat::PlainText => {
                        base_registry
                            .with(fmt::layer().with_writer(io::stdout))
                            .with(fmt::layer().with_writer(non_blocking))
                            .init();
                    }
                    LogFormat::Json => {
                        base_registry
                            .with(fmt::layer().json().with_writer(io::stdout))
                            .with(fmt::layer().json().with_writer(non_blocking))
                            .init();
                    }
                }
                Some(guard)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_log_config_builds_a_non_blocking_writer() {
        let dir = std::env::temp_dir().join("zero_mcts_telemetry_test");
        let cfg = FileLogConfig {
            directory: dir,
            prefix: "test.log".into(),
        };
        let (_writer, _guard) = cfg.prepare_writer();
    }
}
