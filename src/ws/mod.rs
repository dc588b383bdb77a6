pub mod actor;
pub mod dispatch;
pub mod handler;
pub mod lifecycle;
pub mod registry;

use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

pub use dispatch::NotificationDispatcher;
pub use registry::{ConnectionHandle, ConnectionRegistry};
