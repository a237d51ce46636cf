use serde::{Deserialize, Serialize};

// -- Webhook --

/// Query parameters Trello echoes back on every webhook delivery.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

// -- Board settings --

/// Auto-timer configuration a board stores through the Power-Up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTimerSettings {
    #[serde(rename = "autoTimer", default)]
    pub enabled: bool,
    #[serde(rename = "autoTimerListId", default, skip_serializing_if = "Option::is_none")]
    pub trigger_list_id: Option<String>,
}

impl AutoTimerSettings {
    /// Enabled with a non-empty trigger list.
    pub fn is_armed(&self) -> bool {
        self.enabled && self.trigger_list_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn triggers_on(&self, list_id: &str) -> bool {
        self.is_armed() && self.trigger_list_id.as_deref() == Some(list_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_require_enabled_flag_and_list() {
        let off = AutoTimerSettings {
            enabled: false,
            trigger_list_id: Some("l1".into()),
        };
        assert!(!off.triggers_on("l1"));

        let no_list = AutoTimerSettings {
            enabled: true,
            trigger_list_id: None,
        };
        assert!(!no_list.is_armed());

        let armed: AutoTimerSettings =
            serde_json::from_str(r#"{"autoTimer":true,"autoTimerListId":"l1"}"#).unwrap();
        assert!(armed.triggers_on("l1"));
        assert!(!armed.triggers_on("l2"));
    }
}
