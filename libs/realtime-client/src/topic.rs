//! Topic naming and per-topic payload parsing

use crate::error::ParseError;
use crate::events::{InboundEvent, PaymentEventKind, PaymentSuccessEvent};
use serde::de::DeserializeOwned;
use std::fmt;

/// A logical topic multiplexed over the shared connection
///
/// `Display` yields the exact names the backend publishes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Notifications { user_id: String },
    Chat { conversation_id: String },
    Invoice { invoice_id: String },
}

impl Topic {
    pub fn notifications(user_id: impl fmt::Display) -> Self {
        Topic::Notifications {
            user_id: user_id.to_string(),
        }
    }

    pub fn chat(conversation_id: impl fmt::Display) -> Self {
        Topic::Chat {
            conversation_id: conversation_id.to_string(),
        }
    }

    pub fn invoice(invoice_id: impl fmt::Display) -> Self {
        Topic::Invoice {
            invoice_id: invoice_id.to_string(),
        }
    }

    /// Parse a frame body into this topic's event type
    ///
    /// `Ok(None)` means the payload was well-formed but is not something this
    /// topic delivers (e.g. a non-success payment event).
    pub fn parse_event(&self, body: &str) -> Result<Option<InboundEvent>, ParseError> {
        match self {
            Topic::Notifications { .. } => self.decode(body).map(InboundEvent::Notification).map(Some),
            Topic::Chat { .. } => self.decode(body).map(InboundEvent::Chat).map(Some),
            Topic::Invoice { .. } => {
                let event: PaymentSuccessEvent = self.decode(body)?;
                match event.event {
                    PaymentEventKind::PaymentSuccess => Ok(Some(InboundEvent::PaymentSuccess(event))),
                    PaymentEventKind::Other => Ok(None),
                }
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, body: &str) -> Result<T, ParseError> {
        serde_json::from_str(body).map_err(|source| ParseError::Payload {
            topic: self.to_string(),
            source,
        })
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Notifications { user_id } => write!(f, "notifications/book.{}", user_id),
            Topic::Chat { conversation_id } => write!(f, "chat/{}", conversation_id),
            Topic::Invoice { invoice_id } => write!(f, "invoice.{}", invoice_id),
        }
    }
}
