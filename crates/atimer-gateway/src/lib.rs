//! Realtime gateway: owns the live browser sockets on this node, keeps the
//! connection registry in step with them, and delivers pushes to them.

pub mod connection;
pub mod dispatcher;
pub mod push;

pub use dispatcher::Dispatcher;
pub use push::{GatewayPusher, PushError, Pusher};
