//! Typed adapters over the multiplexer
//!
//! Each [`Channel`] pins a topic family to the one event type it carries, so
//! consumers register `Fn(&ChatMessage)` instead of matching on
//! [`InboundEvent`] themselves.

use crate::error::RealtimeError;
use crate::events::{ChatMessage, ChatMessageRequest, InboundEvent, Notification, PaymentSuccessEvent};
use crate::frame::Frame;
use crate::multiplexer::{Multiplexer, Subscription};
use crate::topic::Topic;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

pub trait Channel: 'static {
    type Event: Send + Sync + 'static;

    fn topic(key: &str) -> Topic;

    /// Narrow a delivered event to this channel's type
    fn extract(event: &InboundEvent) -> Option<&Self::Event>;
}

/// `notifications/book.{userId}`
pub enum Notifications {}

/// `chat/{conversationId}`
pub enum Chat {}

/// `invoice.{invoiceId}`, successful payments only
pub enum Payments {}

impl Channel for Notifications {
    type Event = Notification;

    fn topic(key: &str) -> Topic {
        Topic::notifications(key)
    }

    fn extract(event: &InboundEvent) -> Option<&Notification> {
        match event {
            InboundEvent::Notification(notification) => Some(notification),
            InboundEvent::Chat(_) | InboundEvent::PaymentSuccess(_) => None,
        }
    }
}

impl Channel for Chat {
    type Event = ChatMessage;

    fn topic(key: &str) -> Topic {
        Topic::chat(key)
    }

    fn extract(event: &InboundEvent) -> Option<&ChatMessage> {
        match event {
            InboundEvent::Chat(message) => Some(message),
            InboundEvent::Notification(_) | InboundEvent::PaymentSuccess(_) => None,
        }
    }
}

impl Channel for Payments {
    type Event = PaymentSuccessEvent;

    fn topic(key: &str) -> Topic {
        Topic::invoice(key)
    }

    fn extract(event: &InboundEvent) -> Option<&PaymentSuccessEvent> {
        match event {
            InboundEvent::PaymentSuccess(payment) => Some(payment),
            InboundEvent::Notification(_) | InboundEvent::Chat(_) => None,
        }
    }
}

pub struct TypedChannel<C: Channel> {
    mux: Multiplexer,
    _channel: PhantomData<fn() -> C>,
}

impl<C: Channel> Clone for TypedChannel<C> {
    fn clone(&self) -> Self {
        Self::new(self.mux.clone())
    }
}

impl<C: Channel> TypedChannel<C> {
    pub fn new(mux: Multiplexer) -> Self {
        Self {
            mux,
            _channel: PhantomData,
        }
    }

    pub fn topic(key: impl fmt::Display) -> Topic {
        C::topic(&key.to_string())
    }

    pub fn subscribe<F>(&self, key: impl fmt::Display, callback: F) -> Subscription
    where
        F: Fn(&C::Event) + Send + Sync + 'static,
    {
        let topic = Self::topic(key);
        self.mux.subscribe(
            topic,
            Arc::new(move |event: &InboundEvent| {
                if let Some(event) = C::extract(event) {
                    callback(event);
                }
            }),
        )
    }
}

impl TypedChannel<Chat> {
    /// Publish a chat message on the shared connection
    ///
    /// Fails synchronously with `NotConnected` when there is no live
    /// connection; nothing is queued.
    pub fn publish(&self, message: &ChatMessageRequest, credential: &str) -> Result<(), RealtimeError> {
        let session = self.mux.session();
        if !session.is_connected() {
            return Err(RealtimeError::NotConnected);
        }

        let config = session.config();
        let frame = Frame::send(
            &config.destination(&config.chat_send_destination),
            serde_json::to_string(message)?,
        )
        .with_header("Authorization", format!("Bearer {credential}"));
        session.send_frame(&frame)?;

        debug!(conversation_id = message.conversation_id, "Published chat message");
        Ok(())
    }
}
