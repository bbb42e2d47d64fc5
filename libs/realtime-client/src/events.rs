//! Typed payloads carried on realtime topics

use serde::{Deserialize, Deserializer, Serialize};

/// Notification pushed to `notifications/book.{userId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub is_user_read: bool,
    #[serde(default)]
    pub is_admin_read: bool,
    #[serde(default)]
    pub receiver_id: Option<i64>,
    #[serde(default)]
    pub type_id: Option<i64>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Chat message pushed to `chat/{conversationId}`
///
/// Only the routing fields are typed; anything else the backend sends is
/// kept verbatim in `extra`. Ids arrive as numbers or strings and are kept
/// in the same textual form used to name the topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(deserialize_with = "lenient_id")]
    pub conversation_id: String,
    #[serde(deserialize_with = "lenient_id")]
    pub sender_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sent_time: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

/// Body published to the chat send destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRequest {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub message: String,
    pub sent_time: String,
    pub urls: Vec<String>,
}

impl ChatMessageRequest {
    /// Text message stamped with the current time
    pub fn new(conversation_id: i64, sender_id: i64, message: impl Into<String>) -> Self {
        Self {
            conversation_id,
            sender_id,
            message: message.into(),
            sent_time: chrono::Utc::now().to_rfc3339(),
            urls: Vec::new(),
        }
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEventKind {
    #[serde(rename = "PAYMENT_SUCCESS")]
    PaymentSuccess,
    #[serde(other)]
    Other,
}

/// Event pushed to `invoice.{invoiceId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSuccessEvent {
    pub event: PaymentEventKind,
    #[serde(default)]
    pub message: String,
    pub invoice_id: i64,
}

/// Every event the client can deliver, one variant per topic kind
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Notification(Notification),
    Chat(ChatMessage),
    PaymentSuccess(PaymentSuccessEvent),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Notification(_) => "notification",
            InboundEvent::Chat(_) => "chat",
            InboundEvent::PaymentSuccess(_) => "payment_success",
        }
    }
}
