//! Subscriber setup for `tracing` output on stderr

use crate::commands::LogFormat;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, falling back to the verbosity flags
#[must_use]
pub fn filter(config: &CliConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.log_directive()))
}

/// Install the global subscriber
///
/// # Errors
///
/// Returns a configuration error if a subscriber is already installed
pub fn init(config: &CliConfig) -> CliResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match config.log_format {
        LogFormat::Text => builder.with_ansi(config.color.should_color()).try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|e| CliError::config(format!("cannot install logger: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Verbosity;

    mod filter_tests {
        use super::*;

        #[test]
        fn test_verbosity_fallback() {
            if std::env::var_os("RUST_LOG").is_some() {
                return;
            }
            let quiet = CliConfig::new().with_verbosity(Verbosity::Quiet);
            assert_eq!(filter(&quiet).to_string(), "error");
            let debug = CliConfig::new().with_verbosity(Verbosity::Debug);
            assert!(filter(&debug).to_string().contains("verger=debug"));
        }
    }

    mod init_tests {
        use super::*;

        #[test]
        fn test_second_install_is_an_error() {
            let config = CliConfig::new().with_log_format(LogFormat::Json);
            init(&config).unwrap();
            let err = init(&config).unwrap_err();
            assert!(err.to_string().contains("cannot install logger"));
        }
    }
}
