use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Database configuration; one SQLite file per store so the background
/// audit writer never contends with the ingestion stores.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_decks_path")]
    pub decks: PathBuf,
    #[serde(default = "default_runs_path")]
    pub runs: PathBuf,
    #[serde(default = "default_cards_path")]
    pub cards: PathBuf,
    #[serde(default = "default_audit_path")]
    pub audit: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            decks: default_decks_path(),
            runs: default_runs_path(),
            cards: default_cards_path(),
            audit: default_audit_path(),
        }
    }
}

fn default_decks_path() -> PathBuf {
    PathBuf::from("uncommander-decks.db")
}

fn default_runs_path() -> PathBuf {
    PathBuf::from("uncommander-runs.db")
}

fn default_cards_path() -> PathBuf {
    PathBuf::from("uncommander-cards.db")
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("uncommander-audit.db")
}

/// Crawler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    /// Seconds to wait between summary page fetches (default: 2)
    #[serde(default = "default_page_delay")]
    pub page_delay_secs: u64,
    /// Seconds to wait between per-deck card fetches (default: 2)
    #[serde(default = "default_deck_delay")]
    pub deck_delay_secs: u64,
    /// HTTP request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            page_delay_secs: default_page_delay(),
            deck_delay_secs: default_deck_delay(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_page_delay() -> u64 {
    2
}

fn default_deck_delay() -> u64 {
    2
}

fn default_timeout() -> u64 {
    30
}

/// Audit trail configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Event channel capacity; emitters wait when it is full (default: 256)
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer: default_buffer(),
        }
    }
}

fn default_buffer() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.database.decks.to_str().unwrap(), "uncommander-decks.db");
        assert_eq!(config.database.runs.to_str().unwrap(), "uncommander-runs.db");
        assert_eq!(config.database.cards.to_str().unwrap(), "uncommander-cards.db");
        assert_eq!(config.database.audit.to_str().unwrap(), "uncommander-audit.db");
        assert_eq!(config.crawler.page_delay_secs, 2);
        assert_eq!(config.crawler.deck_delay_secs, 2);
        assert_eq!(config.crawler.timeout_secs, 30);
        assert_eq!(config.audit.buffer, 256);
    }

    #[test]
    fn test_deserialize_with_custom_database_paths() {
        let toml = r#"
[database]
decks = "/data/decks.sqlite"
cards = "/data/cards.sqlite"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.decks.to_str().unwrap(), "/data/decks.sqlite");
        assert_eq!(config.database.cards.to_str().unwrap(), "/data/cards.sqlite");
        // Unset paths keep their defaults
        assert_eq!(config.database.runs.to_str().unwrap(), "uncommander-runs.db");
    }

    #[test]
    fn test_deserialize_with_custom_crawler_settings() {
        let toml = r#"
[crawler]
page_delay_secs = 5
timeout_secs = 10
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.crawler.page_delay_secs, 5);
        assert_eq!(config.crawler.deck_delay_secs, 2);
        assert_eq!(config.crawler.timeout_secs, 10);
    }

    #[test]
    fn test_deserialize_with_audit_buffer() {
        let toml = r#"
[audit]
buffer = 1024
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.audit.buffer, 1024);
    }
}
