use serde::Deserialize;
use tandem::core::Configurable;

/// `[runner]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Address the websocket listener binds to
    pub listen: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9410".to_string(),
        }
    }
}

impl Configurable for RunnerConfig {
    const PREFIX: &'static str = "runner";
}

/// `[log]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info` or `tandem=debug,info`
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Configurable for LogConfig {
    const PREFIX: &'static str = "log";
}

#[cfg(test)]
mod tests {
    use tandem::core::{ConfigStore, WebSocketConfig};

    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let store = ConfigStore::empty();
        assert_eq!(store.get::<RunnerConfig>().unwrap().listen, "127.0.0.1:9410");
        assert_eq!(store.get::<LogConfig>().unwrap().level, "info");
    }

    #[test]
    fn full_file() {
        let store = ConfigStore::parse(
            r#"
            [log]
            level = "tandem=debug"

            [websocket]
            key = "demo"
            ping_interval_ms = 2500

            [runner]
            listen = "0.0.0.0:7000"
            "#,
        )
        .unwrap();

        assert_eq!(store.get::<LogConfig>().unwrap().level, "tandem=debug");
        assert_eq!(store.get::<RunnerConfig>().unwrap().listen, "0.0.0.0:7000");
        let ws: WebSocketConfig = store.get().unwrap();
        assert_eq!(ws.key, "demo");
        assert_eq!(ws.ping_interval_ms, 2500);
    }
}
