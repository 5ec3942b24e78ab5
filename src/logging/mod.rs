//! Logging setup and user-facing output
//!
//! All output goes through `tracing`. [`init_tracing`] installs the global
//! subscriber once per process; [`Logger`] is a small cloneable facade used by
//! the runner for sectioned, human-oriented output.

use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `--verbose` selects `debug` and
/// `--quiet` selects `warn`. Calling this twice is harmless.
pub fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("registry_sync={}", default_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Logger responsible for all user-visible output
#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    pub start_time: Instant,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Instant::now(),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Instant::now(),
        }
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        if !self.quiet {
            tracing::info!("=== {} ===", title);
        }
    }

    pub fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    pub fn success(&self, message: &str) {
        tracing::info!(status = "ok", "{}", message);
    }

    pub fn warning(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    /// Only shown with `--verbose`
    pub fn verbose(&self, message: &str) {
        if self.verbose {
            tracing::debug!("{}", message);
        }
    }

    pub fn detail(&self, message: &str) {
        tracing::debug!("  {}", message);
    }

    /// Key-value summary block
    pub fn summary(&self, title: &str, items: &[(&str, String)]) {
        if self.quiet {
            return;
        }

        tracing::info!("{}", title);
        for (key, value) in items {
            tracing::info!("  • {}: {}", key, value);
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{:.1}s", duration.as_secs_f64())
        } else if secs < 3600 {
            format!("{}m{:02}s", secs / 60, secs % 60)
        } else {
            format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        let logger = Logger::new(false);
        assert_eq!(logger.format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(logger.format_duration(Duration::from_secs(125)), "2m05s");
        assert_eq!(logger.format_duration(Duration::from_secs(3725)), "1h02m05s");
    }
}
