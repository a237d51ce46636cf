use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{OriginalUri, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use atimer_db::ConnectionRegistry;
use atimer_gateway::Pusher;
use atimer_types::api::WebhookQuery;
use atimer_types::events::PushEvent;

use crate::event::{CardMove, IgnoreReason, ParsedWebhookEvent, parse_event};
use crate::signature;
use crate::trello::{BoardConfigError, BoardConfigSource, Credentials};

/// Header carrying Trello's signature.
pub const SIGNATURE_HEADER: &str = "x-trello-webhook";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),

    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("malformed body: {0}")]
    Malformed(String),

    #[error("Trello rejected the webhook credentials")]
    CredentialsRejected,

    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl WebhookError {
    /// 410 tells Trello to drop the webhook; everything else is a 500.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::SignatureMismatch | Self::CredentialsRejected => StatusCode::GONE,
            Self::MethodNotAllowed(_)
            | Self::MissingField(_)
            | Self::Malformed(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(_) => error!("webhook failed: {}", self),
            Self::SignatureMismatch | Self::CredentialsRejected => warn!("webhook refused: {}", self),
            _ => debug!("webhook rejected: {}", self),
        }
        self.status().into_response()
    }
}

/// What the relay did with a delivery that was not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// HEAD liveness probe.
    Probe,
    Ignored(IgnoreReason),
    /// Auto timer off for the board, or the card went to another list.
    NotArmed,
    /// Nobody is listening for the member.
    NoListener,
    Delivered { connection_id: String },
    /// Push failed; the registry entry was dropped.
    Evicted { connection_id: String },
}

/// One inbound delivery, detached from the HTTP framework.
#[derive(Debug, Clone)]
pub struct WebhookRequest<'a> {
    pub method: &'a Method,
    /// Raw path and query exactly as received.
    pub path_and_query: &'a str,
    pub query: WebhookQuery,
    pub signature: Option<&'a str>,
    pub body: &'a str,
}

pub struct Relay<R, P, B> {
    registry: Arc<R>,
    pusher: P,
    boards: B,
    secret: String,
    public_url: String,
}

impl<R, P, B> Relay<R, P, B>
where
    R: ConnectionRegistry + 'static,
    P: Pusher,
    B: BoardConfigSource,
{
    pub fn new(registry: R, pusher: P, boards: B, secret: String, public_url: String) -> Self {
        Self {
            registry: Arc::new(registry),
            pusher,
            boards,
            secret,
            public_url,
        }
    }

    pub async fn handle(&self, request: WebhookRequest<'_>) -> Result<RelayOutcome, WebhookError> {
        if request.method == Method::HEAD {
            return Ok(RelayOutcome::Probe);
        }
        if request.method != Method::POST {
            return Err(WebhookError::MethodNotAllowed(request.method.clone()));
        }

        if request.body.is_empty() {
            return Err(WebhookError::MissingField("body"));
        }
        let api_key = non_empty(request.query.api_key).ok_or(WebhookError::MissingField("apiKey"))?;
        let token = non_empty(request.query.token).ok_or(WebhookError::MissingField("token"))?;
        let provided = request
            .signature
            .filter(|s| !s.is_empty())
            .ok_or(WebhookError::MissingField(SIGNATURE_HEADER))?;

        // Nothing in the payload is looked at before this passes.
        let callback_url = signature::callback_url(&self.public_url, request.path_and_query);
        if !signature::verify(&self.secret, request.body, &callback_url, provided) {
            return Err(WebhookError::SignatureMismatch);
        }

        let card_move = match parse_event(request.body) {
            ParsedWebhookEvent::CardMoved(card_move) => card_move,
            ParsedWebhookEvent::Ignored(reason) => {
                debug!("ignoring webhook: {:?}", reason);
                return Ok(RelayOutcome::Ignored(reason));
            }
            ParsedWebhookEvent::Malformed(e) => return Err(WebhookError::Malformed(e)),
        };

        let credentials = Credentials { api_key, token };
        self.relay_card_move(&card_move, &credentials).await
    }

    async fn relay_card_move(
        &self,
        card_move: &CardMove,
        credentials: &Credentials,
    ) -> Result<RelayOutcome, WebhookError> {
        let settings = self
            .boards
            .auto_timer_settings(&card_move.board_id, credentials)
            .await
            .map_err(|e| match e {
                BoardConfigError::Unauthorized => WebhookError::CredentialsRejected,
                other => WebhookError::Internal(other.into()),
            })?;

        if !settings.triggers_on(&card_move.list_after) {
            debug!(
                "board {} not armed for list {}",
                card_move.board_id, card_move.list_after
            );
            return Ok(RelayOutcome::NotArmed);
        }

        let member_id = card_move.member_id.clone();
        let record = self
            .with_registry(move |registry| registry.find_by_member_id(&member_id, 1))
            .await?
            .into_iter()
            .next();
        let Some(record) = record else {
            debug!("no open connection for member {}", card_move.member_id);
            return Ok(RelayOutcome::NoListener);
        };

        let event = PushEvent::start_timer(card_move.card_id.as_str());
        match self.pusher.push(&record, &event).await {
            Ok(()) => {
                info!(
                    "start timer for card {} pushed to {} (member {})",
                    card_move.card_id, record.connection_id, card_move.member_id
                );
                Ok(RelayOutcome::Delivered {
                    connection_id: record.connection_id,
                })
            }
            Err(e) => {
                info!("push to {} failed, evicting: {}", record.connection_id, e);
                let connection_id = record.connection_id.clone();
                if let Err(e) = self
                    .with_registry(move |registry| registry.delete_by_connection_id(&connection_id))
                    .await
                {
                    warn!("failed to evict {}: {}", record.connection_id, e);
                }
                Ok(RelayOutcome::Evicted {
                    connection_id: record.connection_id,
                })
            }
        }
    }
}

impl<R, P, B> Relay<R, P, B>
where
    R: ConnectionRegistry + 'static,
{
    /// Run a registry call on the blocking pool.
    async fn with_registry<T, F>(&self, f: F) -> Result<T, WebhookError>
    where
        F: FnOnce(&R) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || f(&registry))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                WebhookError::Internal(e.into())
            })?
            .map_err(WebhookError::Internal)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Axum handler for `/webhook`; mount with `any(...)` so every method reaches it.
pub async fn receive<R, P, B>(
    State(relay): State<Arc<Relay<R, P, B>>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, WebhookError>
where
    R: ConnectionRegistry + 'static,
    P: Pusher + 'static,
    B: BoardConfigSource + 'static,
{
    let body = match std::str::from_utf8(&body) {
        Ok(body) => body,
        Err(_) if method == Method::HEAD => "",
        Err(e) => return Err(WebhookError::Malformed(format!("body is not UTF-8: {}", e))),
    };
    let query = Query::<WebhookQuery>::try_from_uri(&uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let request = WebhookRequest {
        method: &method,
        path_and_query,
        query,
        signature: headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()),
        body,
    };

    relay.handle(request).await.map(|_| StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use atimer_db::Database;
    use atimer_gateway::PushError;
    use atimer_types::api::AutoTimerSettings;
    use atimer_types::models::{ConnectionRecord, EndpointCoords};

    const SECRET: &str = "app-secret";
    const PUBLIC_URL: &str = "https://timer.example.com";
    const PATH: &str = "/webhook?token=tok&apiKey=key";

    struct FakeBoards {
        settings: AutoTimerSettings,
        unauthorized: bool,
        calls: AtomicUsize,
    }

    impl FakeBoards {
        fn armed(list_id: &str) -> Self {
            Self {
                settings: AutoTimerSettings {
                    enabled: true,
                    trigger_list_id: Some(list_id.into()),
                },
                unauthorized: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl BoardConfigSource for FakeBoards {
        async fn auto_timer_settings(
            &self,
            _board_id: &str,
            credentials: &Credentials,
        ) -> Result<AutoTimerSettings, BoardConfigError> {
            assert_eq!(credentials.token, "tok");
            assert_eq!(credentials.api_key, "key");
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unauthorized {
                return Err(BoardConfigError::Unauthorized);
            }
            Ok(self.settings.clone())
        }
    }

    #[derive(Default)]
    struct FakePusher {
        fail: bool,
        pushes: Mutex<Vec<(String, PushEvent)>>,
    }

    impl Pusher for FakePusher {
        async fn push(&self, record: &ConnectionRecord, event: &PushEvent) -> Result<(), PushError> {
            self.pushes
                .lock()
                .unwrap()
                .push((record.connection_id.clone(), event.clone()));
            if self.fail {
                Err(PushError::Gone(record.connection_id.clone()))
            } else {
                Ok(())
            }
        }
    }

    /// Registry wrapper that counts lookups and deletions.
    struct CountingRegistry {
        db: Database,
        lookups: AtomicUsize,
        deletes: AtomicUsize,
        /// Lookups answer from this snapshot instead of the table, like a lagging index.
        stale: Option<Vec<ConnectionRecord>>,
        /// Every lookup fails, as if the store were down.
        unavailable: bool,
    }

    impl CountingRegistry {
        fn with(records: &[(&str, &str)]) -> Self {
            let db = Database::open_in_memory().unwrap();
            for (connection_id, member_id) in records {
                db.put_connection(&ConnectionRecord {
                    connection_id: connection_id.to_string(),
                    member_id: member_id.to_string(),
                    endpoint: EndpointCoords::new("local", "atimer", "test"),
                })
                .unwrap();
            }
            Self {
                db,
                lookups: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
                stale: None,
                unavailable: false,
            }
        }

        fn lagging(records: &[(&str, &str)]) -> Self {
            let mut registry = Self::with(records);
            registry.stale = Some(registry.db.find_by_member_id("member-1", 1).unwrap());
            registry
        }
    }

    impl ConnectionRegistry for CountingRegistry {
        fn put(&self, record: &ConnectionRecord) -> anyhow::Result<()> {
            self.db.put(record)
        }

        fn delete_by_connection_id(&self, connection_id: &str) -> anyhow::Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.db.delete_by_connection_id(connection_id)
        }

        fn find_by_member_id(&self, member_id: &str, limit: u32) -> anyhow::Result<Vec<ConnectionRecord>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                anyhow::bail!("registry unavailable");
            }
            match &self.stale {
                Some(records) => Ok(records.clone()),
                None => self.db.find_by_member_id(member_id, limit),
            }
        }
    }

    type TestRelay = Relay<CountingRegistry, FakePusher, FakeBoards>;

    fn relay(registry: CountingRegistry, pusher: FakePusher, boards: FakeBoards) -> TestRelay {
        Relay::new(registry, pusher, boards, SECRET.into(), PUBLIC_URL.into())
    }

    fn move_body(before: &str, after: &str) -> String {
        serde_json::json!({
            "action": {
                "type": "updateCard",
                "idMemberCreator": "member-1",
                "data": {
                    "card": {"id": "card-1"},
                    "board": {"id": "board-1"},
                    "listBefore": {"id": before},
                    "listAfter": {"id": after}
                }
            }
        })
        .to_string()
    }

    fn signed(body: &str) -> String {
        signature::sign(SECRET, body, &format!("{}{}", PUBLIC_URL, PATH)).unwrap()
    }

    fn query() -> WebhookQuery {
        WebhookQuery {
            token: Some("tok".into()),
            api_key: Some("key".into()),
        }
    }

    async fn post(relay: &TestRelay, body: &str, sig: &str) -> Result<RelayOutcome, WebhookError> {
        relay
            .handle(WebhookRequest {
                method: &Method::POST,
                path_and_query: PATH,
                query: query(),
                signature: Some(sig),
                body,
            })
            .await
    }

    #[tokio::test]
    async fn head_is_always_accepted() {
        let relay = relay(CountingRegistry::with(&[]), FakePusher::default(), FakeBoards::armed("doing"));
        let outcome = relay
            .handle(WebhookRequest {
                method: &Method::HEAD,
                path_and_query: "/webhook",
                query: WebhookQuery::default(),
                signature: Some("bogus"),
                body: "",
            })
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Probe);
    }

    #[tokio::test]
    async fn other_methods_and_missing_fields_fail_validation() {
        let relay = relay(CountingRegistry::with(&[]), FakePusher::default(), FakeBoards::armed("doing"));
        let body = move_body("todo", "doing");

        let err = relay
            .handle(WebhookRequest {
                method: &Method::PUT,
                path_and_query: PATH,
                query: query(),
                signature: Some(&signed(&body)),
                body: &body,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = relay
            .handle(WebhookRequest {
                method: &Method::POST,
                path_and_query: PATH,
                query: WebhookQuery {
                    token: None,
                    api_key: Some("key".into()),
                },
                signature: Some(&signed(&body)),
                body: &body,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::MissingField("token")));

        let err = relay
            .handle(WebhookRequest {
                method: &Method::POST,
                path_and_query: PATH,
                query: query(),
                signature: None,
                body: &body,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::MissingField(SIGNATURE_HEADER)));

        let err = post(&relay, "", &signed("")).await.unwrap_err();
        assert!(matches!(err, WebhookError::MissingField("body")));
    }

    #[tokio::test]
    async fn bad_signature_is_gone_and_touches_nothing() {
        let relay = relay(
            CountingRegistry::with(&[("c1", "member-1")]),
            FakePusher::default(),
            FakeBoards::armed("doing"),
        );
        let body = move_body("todo", "doing");
        let sig = signed(&body);
        let tampered = body.replace("card-1", "card-2");

        let err = post(&relay, &tampered, &sig).await.unwrap_err();
        assert!(matches!(err, WebhookError::SignatureMismatch));
        assert_eq!(err.status(), StatusCode::GONE);
        assert_eq!(relay.boards.calls.load(Ordering::SeqCst), 0);
        assert_eq!(relay.registry.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn signed_garbage_is_a_validation_error() {
        let relay = relay(CountingRegistry::with(&[]), FakePusher::default(), FakeBoards::armed("doing"));
        let err = post(&relay, "{oops", &signed("{oops")).await.unwrap_err();
        assert!(matches!(err, WebhookError::Malformed(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn same_list_does_no_lookups() {
        let relay = relay(
            CountingRegistry::with(&[("c1", "member-1")]),
            FakePusher::default(),
            FakeBoards::armed("doing"),
        );
        let body = move_body("doing", "doing");

        let outcome = post(&relay, &body, &signed(&body)).await.unwrap();
        assert_eq!(outcome, RelayOutcome::Ignored(IgnoreReason::SameList));
        assert_eq!(relay.boards.calls.load(Ordering::SeqCst), 0);
        assert_eq!(relay.registry.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disarmed_board_or_other_list_stops_before_lookup() {
        let relay = relay(
            CountingRegistry::with(&[("c1", "member-1")]),
            FakePusher::default(),
            FakeBoards::armed("done"),
        );
        let body = move_body("todo", "doing");

        let outcome = post(&relay, &body, &signed(&body)).await.unwrap();
        assert_eq!(outcome, RelayOutcome::NotArmed);
        assert_eq!(relay.boards.calls.load(Ordering::SeqCst), 1);
        assert_eq!(relay.registry.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn revoked_token_is_gone() {
        let mut boards = FakeBoards::armed("doing");
        boards.unauthorized = true;
        let relay = relay(CountingRegistry::with(&[]), FakePusher::default(), boards);
        let body = move_body("todo", "doing");

        let err = post(&relay, &body, &signed(&body)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn qualifying_move_pushes_exactly_once() {
        let relay = relay(
            CountingRegistry::with(&[("c1", "member-1")]),
            FakePusher::default(),
            FakeBoards::armed("doing"),
        );
        let body = move_body("todo", "doing");

        let outcome = post(&relay, &body, &signed(&body)).await.unwrap();
        assert_eq!(
            outcome,
            RelayOutcome::Delivered {
                connection_id: "c1".into()
            }
        );
        let pushes = relay.pusher.pushes.lock().unwrap();
        assert_eq!(*pushes, vec![("c1".to_string(), PushEvent::start_timer("card-1"))]);
    }

    #[tokio::test]
    async fn no_listener_is_still_success() {
        let relay = relay(
            CountingRegistry::with(&[("c1", "someone-else")]),
            FakePusher::default(),
            FakeBoards::armed("doing"),
        );
        let body = move_body("todo", "doing");

        let outcome = post(&relay, &body, &signed(&body)).await.unwrap();
        assert_eq!(outcome, RelayOutcome::NoListener);
        assert!(relay.pusher.pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dead_push_evicts_the_record() {
        let relay = relay(
            CountingRegistry::with(&[("c1", "member-1")]),
            FakePusher {
                fail: true,
                ..Default::default()
            },
            FakeBoards::armed("doing"),
        );
        let body = move_body("todo", "doing");

        let outcome = post(&relay, &body, &signed(&body)).await.unwrap();
        assert_eq!(
            outcome,
            RelayOutcome::Evicted {
                connection_id: "c1".into()
            }
        );
        assert!(relay.registry.db.get_connection("c1").unwrap().is_none());
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let relay = relay(
            CountingRegistry::with(&[("c1", "member-1")]),
            FakePusher {
                fail: true,
                ..Default::default()
            },
            FakeBoards::armed("doing"),
        );
        let body = move_body("todo", "doing");
        let sig = signed(&body);

        let first = post(&relay, &body, &sig).await.unwrap();
        let second = post(&relay, &body, &sig).await.unwrap();

        assert!(matches!(first, RelayOutcome::Evicted { .. }));
        // Record already gone, so the second delivery finds nobody to push to.
        assert_eq!(second, RelayOutcome::NoListener);
        assert_eq!(relay.pusher.pushes.lock().unwrap().len(), 1);
        assert_eq!(relay.registry.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redelivery_with_record_still_present_pushes_twice() {
        let relay = relay(
            CountingRegistry::with(&[("c1", "member-1")]),
            FakePusher::default(),
            FakeBoards::armed("doing"),
        );
        let body = move_body("todo", "doing");
        let sig = signed(&body);

        post(&relay, &body, &sig).await.unwrap();
        post(&relay, &body, &sig).await.unwrap();
        assert_eq!(relay.pusher.pushes.lock().unwrap().len(), 2);
        assert_eq!(relay.registry.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_eviction_of_absent_record_is_a_no_op() {
        let relay = relay(
            CountingRegistry::lagging(&[("c1", "member-1")]),
            FakePusher {
                fail: true,
                ..Default::default()
            },
            FakeBoards::armed("doing"),
        );
        let body = move_body("todo", "doing");
        let sig = signed(&body);

        for _ in 0..2 {
            let outcome = post(&relay, &body, &sig).await.unwrap();
            assert_eq!(
                outcome,
                RelayOutcome::Evicted {
                    connection_id: "c1".into()
                }
            );
        }
        assert_eq!(relay.pusher.pushes.lock().unwrap().len(), 2);
        assert_eq!(relay.registry.deletes.load(Ordering::SeqCst), 2);
        assert!(relay.registry.db.get_connection("c1").unwrap().is_none());
    }

    #[tokio::test]
    async fn registry_lookup_failure_is_internal_error() {
        let mut registry = CountingRegistry::with(&[("c1", "member-1")]);
        registry.unavailable = true;
        let relay = relay(registry, FakePusher::default(), FakeBoards::armed("doing"));
        let body = move_body("todo", "doing");

        let err = post(&relay, &body, &signed(&body)).await.unwrap_err();
        assert!(matches!(err, WebhookError::Internal(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(relay.registry.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(relay.registry.deletes.load(Ordering::SeqCst), 0);
        assert!(relay.pusher.pushes.lock().unwrap().is_empty());
        assert!(relay.registry.db.get_connection("c1").unwrap().is_some());
    }
}
