use crate::ValidatedConfig;
use anyhow::{anyhow, Result};
use tracing::Level;

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init(level: Level, json: bool) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_max_level(level);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

/// Install the subscriber described by `log_level` and `log_json`.
pub fn init_from(config: &ValidatedConfig) -> Result<()> {
    init(config.log_level, config.log_json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn second_install_fails() {
        let _ = init(Level::DEBUG, false);
        assert!(init(Level::INFO, true).is_err());
    }

    #[test]
    fn config_selects_the_subscriber() {
        let config = Config::from_yaml("log_level: warn\nlog_json: true\n")
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(config.log_level, Level::WARN);
        assert!(config.log_json);

        // Whichever test installs first wins; the second install always fails.
        let _ = init_from(&config);
        assert!(init_from(&config).is_err());
    }
}
