use crate::channels::{Chat, Notifications, Payments, TypedChannel};
use crate::config::RealtimeConfig;
use crate::error::{ConnectionError, RealtimeError};
use crate::events::{ChatMessage, ChatMessageRequest, Notification, PaymentSuccessEvent};
use crate::multiplexer::{Multiplexer, Subscription};
use crate::session::{ConnectionState, Session};
use crate::transport::{Transport, WebSocketTransport};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Application-wide handle to the realtime connection
///
/// Cheap to clone; every clone shares the same session and topic registry.
/// Create one per process and hand clones to consumers.
#[derive(Clone)]
pub struct RealtimeClient {
    mux: Multiplexer,
    notifications: TypedChannel<Notifications>,
    chat: TypedChannel<Chat>,
    payments: TypedChannel<Payments>,
}

impl RealtimeClient {
    pub fn new(config: RealtimeConfig, transport: Arc<dyn Transport>) -> Self {
        let mux = Multiplexer::new(Session::new(config, transport));
        Self {
            notifications: TypedChannel::new(mux.clone()),
            chat: TypedChannel::new(mux.clone()),
            payments: TypedChannel::new(mux.clone()),
            mux,
        }
    }

    /// Client over a real WebSocket connection
    pub fn websocket(config: RealtimeConfig) -> Self {
        Self::new(config, Arc::new(WebSocketTransport))
    }

    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.session().connect().await
    }

    /// Tear down every topic registration, then close the connection
    pub fn disconnect(&self) {
        self.mux.clear();
        self.session().disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.session().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.session().state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.session().watch_state()
    }

    pub fn subscribe_notifications<F>(&self, user_id: impl fmt::Display, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.notifications.subscribe(user_id, callback)
    }

    pub fn subscribe_chat<F>(&self, conversation_id: impl fmt::Display, callback: F) -> Subscription
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.chat.subscribe(conversation_id, callback)
    }

    /// Only `PAYMENT_SUCCESS` events reach `callback`
    pub fn subscribe_invoice<F>(&self, invoice_id: impl fmt::Display, callback: F) -> Subscription
    where
        F: Fn(&PaymentSuccessEvent) + Send + Sync + 'static,
    {
        self.payments.subscribe(invoice_id, callback)
    }

    pub fn publish_chat_message(
        &self,
        message: &ChatMessageRequest,
        credential: &str,
    ) -> Result<(), RealtimeError> {
        self.chat.publish(message, credential)
    }

    pub fn notifications(&self) -> &TypedChannel<Notifications> {
        &self.notifications
    }

    pub fn chat(&self) -> &TypedChannel<Chat> {
        &self.chat
    }

    pub fn payments(&self) -> &TypedChannel<Payments> {
        &self.payments
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    pub fn session(&self) -> &Session {
        self.mux.session()
    }
}
