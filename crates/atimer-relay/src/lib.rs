//! Webhook relay: authenticates Trello webhook deliveries and turns
//! qualifying card moves into a "start timer" push for the acting member.

pub mod event;
pub mod signature;
pub mod trello;
pub mod webhook;

pub use event::{CardMove, IgnoreReason, ParsedWebhookEvent};
pub use trello::{BoardConfigError, BoardConfigSource, Credentials, TrelloClient};
pub use webhook::{Relay, RelayOutcome, WebhookError, WebhookRequest};
