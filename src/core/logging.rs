use tracing::Level;

use crate::core::config::LoggingConfig;
use crate::core::errors::{EngineError, Result};

/// Install the global `fmt` subscriber.
///
/// Fails if the level does not parse or another subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let level: Level = config.level.parse().map_err(|_| {
        EngineError::configuration(format!("unknown log level '{}'", config.level))
    })?;

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(config.with_target)
        .try_init()
        .map_err(|e| EngineError::configuration(format!("tracing already initialized: {}", e)))
}
