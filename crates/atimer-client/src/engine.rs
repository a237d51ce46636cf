use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, trace, warn};

use atimer_types::api::AutoTimerSettings;

use crate::backoff::BackoffPolicy;
use crate::machine::{ConnectionState, Effect, Input, Machine};
use crate::transport::{SocketEvent, SocketEvents, SocketHandle, Transport};

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Realtime gateway URL, e.g. `wss://timer.example.com/realtime`.
    pub url: String,
    /// Trello member this browser listens for.
    pub member_id: String,
    pub policy: BackoffPolicy,
}

impl EngineConfig {
    pub fn new(url: impl Into<String>, member_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            member_id: member_id.into(),
            policy: BackoffPolicy::default(),
        }
    }
}

enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Shutdown,
}

/// State the owner reads without going through the engine task.
#[derive(Default)]
struct Shared {
    state: ConnectionState,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: ListenerId,
    /// Single slot, last write wins.
    requested_timer_start: Option<String>,
}

/// Handle to a running reconnection engine. Cheap to clone; all clones
/// drive the same engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Mutex<Shared>>,
}

impl EngineHandle {
    /// Start the engine task. Must be called inside a tokio runtime.
    /// The engine stays `Disconnected` until told to connect.
    pub fn spawn<T: Transport>(config: EngineConfig, transport: T) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));

        let driver = Driver {
            machine: Machine::new(config.member_id, config.policy),
            transport,
            url: config.url,
            shared: shared.clone(),
            socket: None,
            generation: 0,
            events_tx,
            retry: None,
        };
        tokio::spawn(driver.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            shared,
        }
    }

    /// Connect only if the board has the auto timer enabled with a trigger
    /// list. Returns whether a connection was requested.
    pub fn initialize(&self, settings: &AutoTimerSettings) -> bool {
        if !settings.is_armed() {
            debug!("auto timer not armed, realtime channel stays closed");
            return false;
        }
        self.connect();
        true
    }

    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    /// Disconnect, then stop the engine task for good.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("reconnection engine is no longer running");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Called on every distinct state transition, on the engine task.
    pub fn on_state_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let mut shared = self.shared.lock();
        let id = shared.next_listener;
        shared.next_listener += 1;
        shared.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut shared = self.shared.lock();
        let before = shared.listeners.len();
        shared.listeners.retain(|(listener_id, _)| *listener_id != id);
        shared.listeners.len() != before
    }

    /// Read and clear the pending "start timer" request.
    pub fn take_requested_timer_start(&self) -> Option<String> {
        self.shared.lock().requested_timer_start.take()
    }

    /// Consume timer-start requests at a fixed cadence, the way a UI badge
    /// refresh would.
    pub fn poll_timer_starts<F>(&self, every: Duration, mut on_request: F) -> JoinHandle<()>
    where
        F: FnMut(String) + Send + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if handle.commands.is_closed() {
                    break;
                }
                if let Some(card_id) = handle.take_requested_timer_start() {
                    on_request(card_id);
                }
            }
        })
    }
}

/// Owns the machine, the socket and the retry timer. Runs as one task so
/// socket events, timer expiry and commands never interleave.
struct Driver<T> {
    machine: Machine,
    transport: T,
    url: String,
    shared: Arc<Mutex<Shared>>,
    socket: Option<Box<dyn SocketHandle>>,
    /// Bumped on every teardown/open; events tagged with an older value are stale.
    generation: u64,
    events_tx: mpsc::UnboundedSender<(u64, SocketEvent)>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl<T: Transport> Driver<T> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<(u64, SocketEvent)>,
    ) {
        loop {
            let input = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => Input::Connect,
                    Some(Command::Disconnect) => Input::Disconnect,
                    Some(Command::Reconnect) => Input::Reconnect,
                    Some(Command::Shutdown) | None => {
                        self.apply(Input::Disconnect);
                        break;
                    }
                },
                Some((generation, event)) = events.recv() => {
                    if generation != self.generation {
                        trace!("dropping {:?} from superseded socket {}", event, generation);
                        continue;
                    }
                    match event {
                        SocketEvent::Opened => Input::Opened,
                        SocketEvent::Message(text) => Input::Message(text),
                        SocketEvent::Error(e) => {
                            warn!("realtime socket error: {}", e);
                            Input::SocketError(e)
                        }
                        SocketEvent::Closed => Input::Closed,
                    }
                },
                () = retry_elapsed(&mut self.retry), if self.retry.is_some() => {
                    self.retry = None;
                    Input::RetryElapsed
                },
            };
            self.apply(input);
        }

        debug!("reconnection engine stopped");
    }

    fn apply(&mut self, input: Input) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            for effect in self.machine.handle(input) {
                match effect {
                    Effect::StateChanged(state) => self.notify(state),
                    Effect::Teardown => self.teardown(),
                    Effect::OpenSocket => {
                        self.generation += 1;
                        let events = SocketEvents::new(self.generation, self.events_tx.clone());
                        debug!("opening socket {} to {}", self.generation, self.url);
                        self.socket = Some(self.transport.open(&self.url, events));
                    }
                    Effect::Send(text) => {
                        let sent = match self.socket.as_mut() {
                            Some(socket) => socket.send(text).is_ok(),
                            None => false,
                        };
                        if !sent {
                            warn!("subscribe message could not be sent, closing socket");
                            queue.push_back(Input::SendFailed);
                        }
                    }
                    Effect::ScheduleRetry(delay) => {
                        info!(
                            "reconnecting in {} ms (attempt {})",
                            delay.as_millis(),
                            self.machine.retry_count()
                        );
                        self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                    }
                    Effect::TimerStartRequested(card_id) => {
                        info!("start timer requested for card {}", card_id);
                        self.shared.lock().requested_timer_start = Some(card_id);
                    }
                }
            }
        }
    }

    /// Detach and close the current socket and cancel any pending retry.
    fn teardown(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        self.retry = None;
        self.generation += 1;
    }

    fn notify(&self, state: ConnectionState) {
        let listeners: Vec<Listener> = {
            let mut shared = self.shared.lock();
            shared.state = state;
            shared.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        debug!("realtime connection {:?}", state);
        for listener in listeners {
            listener(state);
        }
    }
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
