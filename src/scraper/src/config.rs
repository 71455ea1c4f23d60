//! Scrape input configuration.

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::InputError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Endpoints to scrape; one independent loop per entry.
    pub urls: Vec<String>,

    /// Minimum period between the starts of consecutive scrapes of one URL.
    #[serde(default = "default_scrape_interval_ms")]
    pub scrape_interval_ms: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            scrape_interval_ms: default_scrape_interval_ms(),
        }
    }
}

fn default_scrape_interval_ms() -> u64 {
    5000
}

impl ScrapeConfig {
    pub fn scrape_interval(&self) -> Duration {
        Duration::from_millis(self.scrape_interval_ms)
    }

    pub fn validate(&self) -> Result<(), InputError> {
        if self.urls.is_empty() {
            return Err(InputError::Config(
                "at least one scrape URL is required".to_string(),
            ));
        }
        if self.urls.iter().any(|url| url.trim().is_empty()) {
            return Err(InputError::Config("scrape URLs must not be empty".to_string()));
        }
        if self.scrape_interval_ms == 0 {
            return Err(InputError::Config(
                "scrape_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub scrape: ScrapeConfig,
}

impl Configuration {
    /// Load from `promfeed.toml` and `PROMFEED_`-prefixed environment
    /// variables, layered over the defaults.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file("promfeed.toml"))
            // Single underscore for simple fields: PROMFEED_SCRAPE_URLS
            .merge(Env::prefixed("PROMFEED_").split("_"))
            // Double underscore for fields with underscores:
            // PROMFEED__SCRAPE__SCRAPE_INTERVAL_MS
            .merge(Env::prefixed("PROMFEED__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PROMFEED_").split("_"))
            .merge(Env::prefixed("PROMFEED__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn default_interval_is_five_seconds() {
        let config = ScrapeConfig::default();
        assert_eq!(config.scrape_interval_ms, 5000);
        assert_eq!(config.scrape_interval(), Duration::from_secs(5));
    }

    #[test]
    fn validation_rejects_bad_configs() {
        assert!(ScrapeConfig::default().validate().is_err());

        let blank = ScrapeConfig {
            urls: vec!["".to_string()],
            ..ScrapeConfig::default()
        };
        assert!(blank.validate().is_err());

        let zero_interval = ScrapeConfig {
            urls: vec!["http://localhost:9100/metrics".to_string()],
            scrape_interval_ms: 0,
        };
        assert!(zero_interval.validate().is_err());

        let good = ScrapeConfig {
            urls: vec!["http://localhost:9100/metrics".to_string()],
            ..ScrapeConfig::default()
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn interval_defaults_when_omitted_from_toml() {
        let config: ScrapeConfig =
            toml_from_str("urls = [\"http://localhost:9100/metrics\"]");
        assert_eq!(config.scrape_interval_ms, 5000);
    }

    fn toml_from_str(raw: &str) -> ScrapeConfig {
        Figment::from(Toml::string(raw)).extract().unwrap()
    }

    #[test]
    fn load_layers_toml_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "promfeed.toml",
                r#"
                [scrape]
                urls = ["http://localhost:9100/metrics"]
                "#,
            )?;
            jail.set_env("PROMFEED__SCRAPE__SCRAPE_INTERVAL_MS", "250");

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(
                config.scrape.urls,
                vec!["http://localhost:9100/metrics".to_string()]
            );
            assert_eq!(config.scrape.scrape_interval_ms, 250);

            Ok(())
        });
    }
}
