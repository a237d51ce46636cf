//! Connection state machine with no I/O of its own.
//!
//! `Machine::handle` takes one input and returns the effects the driver must
//! perform, in order. The driver owns the socket and the retry timer; the
//! machine only decides. Inputs that do not make sense in the current state
//! (a late `Closed` after a manual disconnect, a retry firing while
//! connected) are dropped.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use atimer_types::events::{PushEvent, SubscribeCommand};

use crate::backoff::BackoffPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// `connect()` from the owner.
    Connect,
    /// Manual reconnect: reset the retry budget and connect now.
    Reconnect,
    /// Manual disconnect: stop and never retry on our own.
    Disconnect,
    Opened,
    /// The subscribe message could not be written.
    SendFailed,
    SocketError(String),
    Message(String),
    Closed,
    RetryElapsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StateChanged(ConnectionState),
    /// Detach and close the current socket, cancel any pending retry.
    Teardown,
    OpenSocket,
    Send(String),
    ScheduleRetry(Duration),
    TimerStartRequested(String),
}

pub struct Machine<G = StdRng> {
    state: ConnectionState,
    retry_count: u32,
    member_id: String,
    policy: BackoffPolicy,
    rng: G,
}

impl Machine<StdRng> {
    pub fn new(member_id: impl Into<String>, policy: BackoffPolicy) -> Self {
        Self::with_rng(member_id, policy, StdRng::from_os_rng())
    }
}

impl<G: Rng> Machine<G> {
    pub fn with_rng(member_id: impl Into<String>, policy: BackoffPolicy, rng: G) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_count: 0,
            member_id: member_id.into(),
            policy,
            rng,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::Connect => self.connect(&mut effects),
            Input::Reconnect => {
                self.retry_count = 0;
                self.connect(&mut effects);
            }
            Input::RetryElapsed => {
                if self.state == ConnectionState::Reconnecting {
                    self.connect(&mut effects);
                }
            }
            Input::Disconnect => {
                self.retry_count = self.policy.max_attempts;
                effects.push(Effect::Teardown);
                self.transition(ConnectionState::Disconnected, &mut effects);
            }
            Input::Opened => {
                if self.is_attempting() {
                    self.retry_count = 0;
                    self.transition(ConnectionState::Connected, &mut effects);
                    match serde_json::to_string(&SubscribeCommand::for_member(self.member_id.as_str())) {
                        Ok(text) => effects.push(Effect::Send(text)),
                        Err(_) => self.closed(&mut effects),
                    }
                }
            }
            Input::SendFailed | Input::Closed => {
                if self.is_attempting() || self.state == ConnectionState::Connected {
                    self.closed(&mut effects);
                }
            }
            // The close that follows drives the transition.
            Input::SocketError(_) => {}
            Input::Message(text) => {
                if self.state == ConnectionState::Connected {
                    if let Ok(PushEvent::StartTimer { card_id }) = serde_json::from_str(&text) {
                        if !card_id.is_empty() {
                            effects.push(Effect::TimerStartRequested(card_id));
                        }
                    }
                }
            }
        }
        effects
    }

    fn is_attempting(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    fn connect(&mut self, effects: &mut Vec<Effect>) {
        let next = if self.retry_count == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        self.transition(next, effects);
        effects.push(Effect::Teardown);
        effects.push(Effect::OpenSocket);
    }

    fn closed(&mut self, effects: &mut Vec<Effect>) {
        effects.push(Effect::Teardown);
        if self.policy.allows_retry(self.retry_count) {
            let delay = self.policy.jittered(self.retry_count, &mut self.rng);
            self.retry_count += 1;
            effects.push(Effect::ScheduleRetry(delay));
            self.transition(ConnectionState::Reconnecting, effects);
        } else {
            self.transition(ConnectionState::Failed, effects);
        }
    }

    fn transition(&mut self, next: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != next {
            self.state = next;
            effects.push(Effect::StateChanged(next));
        }
    }
}
