use serde::{Deserialize, Serialize};

/// Events pushed from the server to an open browser socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PushEvent {
    /// A card moved into the auto-timer trigger list; the listener should start its timer.
    StartTimer { card_id: String },
}

impl PushEvent {
    pub fn start_timer(card_id: impl Into<String>) -> Self {
        Self::StartTimer {
            card_id: card_id.into(),
        }
    }
}

/// Control message sent FROM client TO server over the realtime socket.
///
/// The field is optional so a well-formed JSON object without it can be
/// told apart from invalid JSON; both are rejected by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_member_id: Option<String>,
}

impl SubscribeCommand {
    pub fn for_member(member_id: impl Into<String>) -> Self {
        Self {
            listen_member_id: Some(member_id.into()),
        }
    }
}

/// Gateway answer to a control message, sent back on the same socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    /// HTTP-style status: 200 on success, 500 when the message was refused.
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    pub fn ok() -> Self {
        Self {
            status: 200,
            error: None,
        }
    }

    pub fn failed(status: u16, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}
