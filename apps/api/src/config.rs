use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::llm_client::{Credential, Provider};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Application configuration loaded from environment variables.
/// Nothing is required; every variable has a default.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub default_provider: Provider,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub llm_timeout: Duration,
    /// Sessions untouched for this long are evicted.
    pub session_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let default_provider = match get("DEFAULT_PROVIDER") {
            Some(raw) => raw
                .parse::<Provider>()
                .map_err(|e| anyhow!(e))
                .context("DEFAULT_PROVIDER must be 'openai' or 'claude'")?,
            None => Provider::default(),
        };

        Ok(Config {
            port: get("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            default_provider,
            openai_api_key: non_blank(get("OPENAI_API_KEY")),
            anthropic_api_key: non_blank(get("ANTHROPIC_API_KEY")),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            anthropic_base_url: get("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            llm_timeout: Duration::from_secs(
                get("LLM_TIMEOUT_SECS")
                    .unwrap_or_else(|| "120".to_string())
                    .parse::<u64>()
                    .context("LLM_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            session_ttl: session_ttl(get("SESSION_TTL_SECS"))?,
        })
    }

    /// Server-side key for `provider`, attached to sessions created without one.
    /// A malformed key is ignored rather than failing session creation.
    pub fn fallback_credential(&self, provider: Provider) -> Option<Credential> {
        let key = match provider {
            Provider::OpenAi => self.openai_api_key.as_deref(),
            Provider::Anthropic => self.anthropic_api_key.as_deref(),
        }?;
        Credential::new(provider, key).ok()
    }
}

fn session_ttl(raw: Option<String>) -> Result<Duration> {
    let secs = raw
        .unwrap_or_else(|| "3600".to_string())
        .parse::<u64>()
        .context("SESSION_TTL_SECS must be a whole number of seconds")?;
    if secs == 0 {
        return Err(anyhow!("SESSION_TTL_SECS must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.rust_log, "info");
        assert_eq!(config.default_provider, Provider::OpenAi);
        assert_eq!(config.openai_base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(config.llm_timeout, Duration::from_secs(120));
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert!(config.fallback_credential(Provider::OpenAi).is_none());
    }

    #[test]
    fn test_overrides_and_fallback_keys() {
        let config = load(&[
            ("PORT", "3000"),
            ("DEFAULT_PROVIDER", "anthropic"),
            ("ANTHROPIC_API_KEY", "sk-ant-abc"),
            ("OPENAI_API_KEY", "   "),
            ("LLM_TIMEOUT_SECS", "30"),
            ("SESSION_TTL_SECS", "900"),
        ])
        .unwrap();
        assert_eq!(config.session_ttl, Duration::from_secs(900));
        assert_eq!(config.port, 3000);
        assert_eq!(config.default_provider, Provider::Anthropic);
        assert_eq!(config.llm_timeout, Duration::from_secs(30));
        assert!(config.openai_api_key.is_none());
        let cred = config.fallback_credential(Provider::Anthropic).unwrap();
        assert_eq!(cred.api_key(), "sk-ant-abc");
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(load(&[("PORT", "eighty")]).is_err());
        assert!(load(&[("DEFAULT_PROVIDER", "gemini")]).is_err());
        assert!(load(&[("LLM_TIMEOUT_SECS", "-1")]).is_err());
        assert!(load(&[("SESSION_TTL_SECS", "0")]).is_err());
        assert!(load(&[("SESSION_TTL_SECS", "1h")]).is_err());
    }
}
