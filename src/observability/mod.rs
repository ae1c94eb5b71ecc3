//! Diagnostic logging setup.
//!
//! All diagnostics go to standard error through `tracing`; standard output
//! is reserved for the message echo.

use std::time::{Duration, Instant};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Filter directive used by `--debug`.
pub const DEBUG_DIRECTIVE: &str = "debug";

/// Returns the filter directive for the given verbosity.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        DEBUG_DIRECTIVE
    } else {
        DEFAULT_DIRECTIVE
    }
}

/// Builds the level filter; a non-empty `RUST_LOG` wins over `debug`.
pub fn build_filter(debug: bool, rust_log: Option<&str>) -> EnvFilter {
    match rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .unwrap_or_else(|_| EnvFilter::new(default_directive(debug))),
        None => EnvFilter::new(default_directive(debug)),
    }
}

/// Installs the global subscriber writing to standard error.
///
/// Calling it twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_tracing(debug: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(debug, rust_log.as_deref());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .try_init();
}

/// Times an operation and logs the elapsed time at debug when stopped.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        tracing::debug!(
            timer = self.name,
            duration_ms = elapsed.as_millis() as u64,
            "Timer stopped"
        );
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
    }

    #[test]
    fn test_filter_prefers_rust_log() {
        assert_eq!(build_filter(false, None).to_string(), "info");
        assert_eq!(build_filter(true, Some("  ")).to_string(), "debug");
        assert_eq!(build_filter(true, Some("warn")).to_string(), "warn");
    }

    #[test]
    fn test_init_twice() {
        init_tracing(false);
        init_tracing(true);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.stop();
        assert!(duration >= Duration::from_millis(10));
    }
}
