use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub languages_path: PathBuf,
    pub supported_languages: Vec<String>,
    /// Signs email validation and password reset links.
    pub email_validation_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "5".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid number")?;
        let acquire_timeout_secs: u64 = lookup("DATABASE_ACQUIRE_TIMEOUT_SECS")
            .unwrap_or_else(|| "5".to_string())
            .parse()
            .context("DATABASE_ACQUIRE_TIMEOUT_SECS must be a valid number")?;

        Ok(Self {
            database_url,
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
            languages_path: lookup("LANGUAGES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./")),
            supported_languages: lookup("SUPPORTED_LANGUAGES")
                .map(|raw| parse_language_list(&raw))
                .unwrap_or_else(|| vec!["en".to_string(), "de".to_string()]),
            email_validation_secret: lookup("EMAIL_VALIDATION_SECRET")
                .map(|secret| secret.trim().to_string())
                .filter(|secret| !secret.is_empty()),
        })
    }
}

fn parse_language_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_missing() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/dpv")]))
            .expect("config should load");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.supported_languages, vec!["en", "de"]);
        assert_eq!(config.email_validation_secret, None);
    }

    #[test]
    fn blank_validation_secret_counts_as_missing() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/dpv"),
            ("EMAIL_VALIDATION_SECRET", "   "),
        ]))
        .expect("config should load");
        assert_eq!(config.email_validation_secret, None);

        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/dpv"),
            ("EMAIL_VALIDATION_SECRET", "s3cret"),
        ]))
        .expect("config should load");
        assert_eq!(config.email_validation_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn database_url_is_required() {
        let err = Config::from_lookup(lookup(&[])).expect_err("missing url should fail");
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn language_list_is_trimmed() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/dpv"),
            ("SUPPORTED_LANGUAGES", " de, en ,, fr"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
        ]))
        .expect("config should load");
        assert_eq!(config.supported_languages, vec!["de", "en", "fr"]);
        assert_eq!(config.max_connections, 12);
    }
}
