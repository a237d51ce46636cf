//! Client side of the realtime channel: keeps one socket to the gateway
//! open for the current member, reconnecting with bounded exponential
//! backoff, and records "start timer" requests for the UI to pick up.

pub mod backoff;
pub mod engine;
pub mod machine;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use engine::{EngineConfig, EngineHandle, ListenerId};
pub use machine::{ConnectionState, Effect, Input, Machine};
pub use transport::{SocketEvent, SocketEvents, SocketHandle, Transport, TransportError, TungsteniteTransport};
