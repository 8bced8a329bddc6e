//! Logging setup

use crate::config::LogLevel;
use tracing_subscriber::EnvFilter;

impl LogLevel {
    /// Filter directive for this level
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Install the global fmt subscriber. `RUST_LOG` takes precedence over `level`.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filters() {
        assert_eq!(LogLevel::Off.as_filter(), "off");
        assert_eq!(LogLevel::Info.as_filter(), "info");
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
    }

    #[test]
    fn test_init_twice() {
        init(LogLevel::Warn);
        init(LogLevel::Debug);
    }
}
