//! Realtime client for the hospital admin backend
//!
//! One STOMP-over-WebSocket session is shared by every consumer in the
//! process. Consumers subscribe to logical topics (notifications, chat
//! conversations, invoice payments) and the [`Multiplexer`] keeps exactly one
//! broker subscription per topic underneath.
//!
//! ```ignore
//! let client = RealtimeClient::websocket(RealtimeConfig::from_env()?);
//! client.connect().await?;
//!
//! let _sub = client.subscribe_chat(42, |message| {
//!     tracing::info!(sender = %message.sender_id, "new chat message");
//! });
//! ```

pub mod channels;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod logging;
pub mod multiplexer;
pub mod session;
pub mod topic;
pub mod transport;

pub use channels::{Channel, Chat, Notifications, Payments, TypedChannel};
pub use client::RealtimeClient;
pub use config::RealtimeConfig;
pub use error::{ConnectionError, ParseError, RealtimeError, Result};
pub use events::{
    ChatMessage, ChatMessageRequest, InboundEvent, Notification, PaymentEventKind,
    PaymentSuccessEvent,
};
pub use multiplexer::{Callback, Multiplexer, Subscription};
pub use session::{ConnectionState, ConnectionStatus, Heartbeats, Session, SessionObserver};
pub use topic::Topic;
pub use transport::{Transport, WebSocketTransport};
