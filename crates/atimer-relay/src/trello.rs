use std::future::Future;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use atimer_types::api::AutoTimerSettings;

/// Credentials Trello echoed on the webhook URL, reused to call back into its API.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub token: String,
}

#[derive(Debug, Error)]
pub enum BoardConfigError {
    /// Token or key no longer valid; the webhook should be de-registered.
    #[error("Trello rejected the token or API key")]
    Unauthorized,

    #[error("board config request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Trello answered {0}")]
    Status(reqwest::StatusCode),
}

/// Source of a board's auto-timer settings.
pub trait BoardConfigSource: Send + Sync {
    fn auto_timer_settings(
        &self,
        board_id: &str,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<AutoTimerSettings, BoardConfigError>> + Send;
}

/// One entry of `GET /boards/{id}/pluginData`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginData {
    pub id_plugin: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub access: Option<String>,
    pub value: String,
}

/// Reads board plugin data through Trello's REST API.
#[derive(Clone)]
pub struct TrelloClient {
    http: reqwest::Client,
    api_url: String,
    powerup_id: Option<String>,
}

impl TrelloClient {
    pub fn new(api_url: impl Into<String>, powerup_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            powerup_id,
        }
    }

    pub async fn plugin_data(
        &self,
        board_id: &str,
        credentials: &Credentials,
    ) -> Result<Vec<PluginData>, BoardConfigError> {
        let url = format!("{}/boards/{}/pluginData", self.api_url, board_id);
        let response = self
            .http
            .get(&url)
            .query(&[("key", credentials.api_key.as_str()), ("token", credentials.token.as_str())])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            reqwest::StatusCode::UNAUTHORIZED => Err(BoardConfigError::Unauthorized),
            status => Err(BoardConfigError::Status(status)),
        }
    }
}

impl BoardConfigSource for TrelloClient {
    async fn auto_timer_settings(
        &self,
        board_id: &str,
        credentials: &Credentials,
    ) -> Result<AutoTimerSettings, BoardConfigError> {
        let entries = self.plugin_data(board_id, credentials).await?;
        debug!("board {} has {} plugin data entries", board_id, entries.len());
        Ok(settings_from_plugin_data(&entries, self.powerup_id.as_deref()))
    }
}

/// Pick the Power-Up's board-shared settings out of the plugin data list.
/// Absent or unreadable data means the auto timer is off.
pub fn settings_from_plugin_data(entries: &[PluginData], powerup_id: Option<&str>) -> AutoTimerSettings {
    entries
        .iter()
        .filter(|entry| powerup_id.is_none_or(|id| entry.id_plugin == id))
        .filter(|entry| entry.scope.as_deref().is_none_or(|scope| scope == "board"))
        .filter(|entry| entry.access.as_deref() != Some("private"))
        .find_map(|entry| match serde_json::from_str::<AutoTimerSettings>(&entry.value) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!("unreadable plugin data from {}: {}", entry.id_plugin, e);
                None
            }
        })
        .unwrap_or_default()
}
