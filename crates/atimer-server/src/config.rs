use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use atimer_types::models::EndpointCoords;

/// Secrets copied from sample env files that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me", "your-trello-secret", "trello-secret-here"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TRELLO_SECRET is unset or still a placeholder")]
    MissingSecret,
    #[error("{name} is not valid: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub public_url: String,
    pub trello_secret: String,
    pub trello_api_url: String,
    pub powerup_id: Option<String>,
    pub endpoint: EndpointCoords,
    pub push_url_template: String,
    pub push_key: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let trello_secret = lookup("TRELLO_SECRET").unwrap_or_default();
        if trello_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&trello_secret.as_str()) {
            return Err(ConfigError::MissingSecret);
        }

        let host = var("ATIMER_HOST", "0.0.0.0");
        let port = var("ATIMER_PORT", "3000");
        let addr_text = format!("{}:{}", host, port);
        let addr = addr_text.parse().map_err(|_| ConfigError::Invalid {
            name: "ATIMER_HOST/ATIMER_PORT",
            value: addr_text.clone(),
        })?;

        let public_url = var("ATIMER_PUBLIC_URL", "http://localhost:3000");
        if !public_url.starts_with("http://") && !public_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                name: "ATIMER_PUBLIC_URL",
                value: public_url,
            });
        }

        Ok(Self {
            addr,
            db_path: var("ATIMER_DB_PATH", "atimer.db").into(),
            public_url: public_url.trim_end_matches('/').to_string(),
            trello_secret,
            trello_api_url: var("TRELLO_API_URL", "https://api.trello.com/1"),
            powerup_id: optional("TRELLO_POWERUP_ID"),
            endpoint: EndpointCoords::new(
                var("ATIMER_REGION", "local"),
                var("ATIMER_API_ID", "atimer"),
                var("ATIMER_STAGE", "prod"),
            ),
            push_url_template: var(
                "ATIMER_PUSH_URL_TEMPLATE",
                "http://{api_id}.{region}.internal/{stage}",
            ),
            push_key: optional("ATIMER_PUSH_KEY"),
        })
    }
}
