use serde::Deserialize;

/// The only action type that can move a card between lists.
pub const UPDATE_CARD: &str = "updateCard";

/// A card that changed list, with the member who moved it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardMove {
    pub card_id: String,
    pub board_id: String,
    pub member_id: String,
    pub list_before: String,
    pub list_after: String,
}

/// Why a well-formed delivery needs no further work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    MissingFields,
    NotCardUpdate(String),
    SameList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedWebhookEvent {
    CardMoved(CardMove),
    Ignored(IgnoreReason),
    /// Body is not JSON at all.
    Malformed(String),
}

// Trello's action envelope. Every field is optional so shape problems
// classify as `MissingFields` instead of failing deserialization.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WebhookPayload {
    action: Option<Action>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Action {
    #[serde(rename = "type")]
    action_type: Option<String>,
    id_member_creator: Option<String>,
    member_creator: Option<IdRef>,
    data: Option<ActionData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ActionData {
    card: Option<IdRef>,
    board: Option<IdRef>,
    list_before: Option<IdRef>,
    list_after: Option<IdRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IdRef {
    id: Option<String>,
}

fn id_of(reference: Option<IdRef>) -> Option<String> {
    reference.and_then(|r| r.id).filter(|id| !id.is_empty())
}

/// Classify a raw webhook body. Only `CardMoved` needs further work.
pub fn parse_event(body: &str) -> ParsedWebhookEvent {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => return ParsedWebhookEvent::Malformed(e.to_string()),
    };

    // Valid JSON with the wrong shape (e.g. `"action": 3`) is just missing data.
    let Ok(payload) = serde_json::from_value::<WebhookPayload>(value) else {
        return ParsedWebhookEvent::Ignored(IgnoreReason::MissingFields);
    };
    let Some(action) = payload.action else {
        return ParsedWebhookEvent::Ignored(IgnoreReason::MissingFields);
    };

    let action_type = action.action_type;
    let member_id = action
        .id_member_creator
        .filter(|id| !id.is_empty())
        .or_else(|| id_of(action.member_creator));
    let data = action.data.unwrap_or_default();

    let (Some(action_type), Some(member_id), Some(card_id), Some(board_id), Some(list_before), Some(list_after)) = (
        action_type,
        member_id,
        id_of(data.card),
        id_of(data.board),
        id_of(data.list_before),
        id_of(data.list_after),
    ) else {
        return ParsedWebhookEvent::Ignored(IgnoreReason::MissingFields);
    };

    if action_type != UPDATE_CARD {
        return ParsedWebhookEvent::Ignored(IgnoreReason::NotCardUpdate(action_type));
    }
    if list_before == list_after {
        return ParsedWebhookEvent::Ignored(IgnoreReason::SameList);
    }

    ParsedWebhookEvent::CardMoved(CardMove {
        card_id,
        board_id,
        member_id,
        list_before,
        list_after,
    })
}
