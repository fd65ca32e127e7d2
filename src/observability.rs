// Centralized observability infrastructure for CIE
// Structured logging and operation timing helpers shared by every component.

use anyhow::Result;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging and tracing infrastructure
/// This should be called once at application startup
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity.
///
/// Precedence: `quiet` silences everything below errors unconditionally,
/// then `RUST_LOG` directives, then the `verbose` flag's defaults. A
/// repeated init in the same process is a no-op, so tests can call this
/// freely.
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_ansi(true);
    let _ = tracing_subscriber::registry()
        .with(log_filter(verbose, quiet))
        .with(fmt_layer)
        .try_init();
    debug!("CIE observability initialized");
    Ok(())
}

fn log_filter(verbose: bool, quiet: bool) -> EnvFilter {
    if quiet {
        return EnvFilter::new("error");
    }
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return from_env;
    }
    EnvFilter::new(if verbose {
        "cie=debug,info"
    } else {
        "cie=warn,error"
    })
}

/// Time a named operation, logging at debug on success and warn past a
/// slow-operation threshold.
pub struct OperationTimer {
    name: &'static str,
    started: Instant,
    slow_threshold_ms: u128,
}

impl OperationTimer {
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            started: Instant::now(),
            slow_threshold_ms: 1_000,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    pub fn finish(self) {
        let elapsed = self.elapsed_ms();
        if elapsed > self.slow_threshold_ms {
            warn!(operation = self.name, elapsed_ms = elapsed as u64, "slow operation");
        } else {
            debug!(operation = self.name, elapsed_ms = elapsed as u64, "operation complete");
        }
    }
}

/// Log a one-line ingestion summary at info level
pub fn log_ingest_summary(files: usize, functions: usize, edges: usize, failures: usize) {
    info!(
        files,
        functions, edges, failures, "ingestion run complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        assert!(init_logging().is_ok());
        assert!(init_logging().is_ok());
        assert!(init_logging_with_level(true, false).is_ok());
    }

    #[test]
    fn quiet_wins_over_everything() {
        // Quiet ignores RUST_LOG and the verbose flag alike
        assert_eq!(log_filter(true, true).to_string(), "error");
        assert_eq!(log_filter(false, true).to_string(), "error");
    }

    #[test]
    fn timer_reports_elapsed() {
        let timer = OperationTimer::start("test_op");
        assert!(timer.elapsed_ms() < 1_000);
        timer.finish();
    }
}
