//! Published session configuration.

use super::session::{ConfigValidationError, SessionConfig};
use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the config in force. Publishing swaps one `Arc`; readers clone it
/// and never hold the lock while using the snapshot.
#[derive(Debug)]
pub struct ConfigSlot {
    current: RwLock<Arc<SessionConfig>>,
}

impl ConfigSlot {
    pub fn new(initial: SessionConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Snapshot of the config in force.
    pub fn current(&self) -> Arc<SessionConfig> {
        Arc::clone(&self.current.read())
    }

    /// Validates and publishes `config`. The previous config stays in force
    /// on error.
    pub fn publish(&self, config: SessionConfig) -> Result<Arc<SessionConfig>, ConfigValidationError> {
        config.validate()?;
        let config = Arc::new(config);
        *self.current.write() = Arc::clone(&config);
        tracing::info!(config = ?config, "Session config published");
        Ok(config)
    }
}

impl Default for ConfigSlot {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_keeps_previous() {
        let slot = ConfigSlot::default();
        let err = slot
            .publish(SessionConfig {
                timeout_ms: 5_000,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.field(), Some("timeOut"));
        assert_eq!(slot.current().timeout_ms, 30_000);
    }

    #[test]
    fn test_snapshots_are_independent() {
        let slot = ConfigSlot::default();
        let before = slot.current();
        slot.publish(SessionConfig {
            pass_count: 7,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(before.pass_count, 1);
        assert_eq!(slot.current().pass_count, 7);
    }
}
