//! Tracing subscriber setup for hosts that do not install their own.

use tracing_subscriber::EnvFilter;

use crate::types::{LogIndexError, Result};

/// Default directive when neither `RUST_LOG` nor an explicit filter is given.
pub const DEFAULT_FILTER: &str = "logindex=info";

/// Installs a global `fmt` subscriber writing to stderr.
///
/// `RUST_LOG` wins over `filter` when set. Fails if the directive does not
/// parse or a global subscriber is already installed.
pub fn init_logging(filter: Option<&str>) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter.unwrap_or(DEFAULT_FILTER))
            .map_err(|err| LogIndexError::Config(format!("invalid log filter: {err}")))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(|err| LogIndexError::Config(format!("logging already initialised: {err}")))
}
