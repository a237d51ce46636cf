use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Something that happened on a socket, reported back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    Error(String),
    Closed,
}

/// Event sink handed to a transport when a socket is opened. Every event is
/// tagged with the socket's generation so the engine can drop events from
/// sockets it has already torn down.
#[derive(Clone)]
pub struct SocketEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, SocketEvent)>,
}

impl SocketEvents {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, SocketEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the engine is gone.
    pub fn emit(&self, event: SocketEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket is closed")]
    Closed,
}

pub trait SocketHandle: Send {
    fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close whether the socket is open or still connecting. Idempotent.
    fn close(&mut self);
}

/// Opens realtime sockets. Opening never blocks: progress is reported
/// through `events`.
pub trait Transport: Send + 'static {
    fn open(&mut self, url: &str, events: SocketEvents) -> Box<dyn SocketHandle>;
}

/// WebSocket transport on `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn open(&mut self, url: &str, events: SocketEvents) -> Box<dyn SocketHandle> {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(url.to_string(), events, outgoing_rx));
        Box::new(TungsteniteSocket {
            outgoing: outgoing_tx,
            task,
        })
    }
}

struct TungsteniteSocket {
    outgoing: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl SocketHandle for TungsteniteSocket {
    fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.task.is_finished() {
            return Err(TransportError::Closed);
        }
        self.outgoing.send(text).map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        self.task.abort();
    }
}

impl Drop for TungsteniteSocket {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_socket(url: String, events: SocketEvents, mut outgoing: mpsc::UnboundedReceiver<String>) {
    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            events.emit(SocketEvent::Error(e.to_string()));
            events.emit(SocketEvent::Closed);
            return;
        }
    };
    debug!("socket {} open to {}", events.generation(), url);
    events.emit(SocketEvent::Opened);

    let (mut sink, mut stream) = stream.split();
    loop {
        tokio::select! {
            text = outgoing.recv() => {
                let Some(text) = text else { break };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    events.emit(SocketEvent::Error(e.to_string()));
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    events.emit(SocketEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.emit(SocketEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }

    events.emit(SocketEvent::Closed);
}
