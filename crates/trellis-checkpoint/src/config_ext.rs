use serde_json::json;
use trellis_core::config::RunConfig;

use crate::interrupt::config_keys;

/// Session addressing on top of [`RunConfig`].
///
/// Runs sharing a session id share checkpoints, which is what lets an
/// interrupted workflow be resumed by a later call.
pub trait CheckpointConfigExt {
    fn with_session_id(self, session_id: impl Into<String>) -> Self;
    fn session_id(&self) -> Option<String>;
}

impl CheckpointConfigExt for RunConfig {
    fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.configurable
            .insert(config_keys::SESSION_ID.into(), json!(session_id.into()));
        self
    }

    /// Non-string values are ignored.
    fn session_id(&self) -> Option<String> {
        self.configurable
            .get(config_keys::SESSION_ID)
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_lives_in_configurable() {
        let config = RunConfig::default()
            .with_configurable("region", json!("eu"))
            .with_session_id("session-1");
        assert_eq!(config.session_id().as_deref(), Some("session-1"));
        assert_eq!(config.configurable["region"], json!("eu"));
        assert!(RunConfig::default().session_id().is_none());
    }

    #[test]
    fn non_string_session_id_is_ignored() {
        let config = RunConfig::default().with_configurable(config_keys::SESSION_ID, json!(42));
        assert!(config.session_id().is_none());
    }
}
