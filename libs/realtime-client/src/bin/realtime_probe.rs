//! Connects to the realtime broker and logs every event for one user
//!
//! PROBE_USER_ID selects the notification stream; PROBE_CONVERSATION_ID and
//! PROBE_INVOICE_ID optionally add a chat conversation and an invoice.

use anyhow::Context;
use realtime_client::{config::parse_var, logging, RealtimeClient, RealtimeConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let config = RealtimeConfig::from_env()?;
    let user_id: i64 = parse_var("PROBE_USER_ID")?.context("PROBE_USER_ID must be set")?;
    let conversation_id: Option<String> = parse_var("PROBE_CONVERSATION_ID")?;
    let invoice_id: Option<i64> = parse_var("PROBE_INVOICE_ID")?;

    let client = RealtimeClient::websocket(config);
    client.connect().await.context("connecting to realtime broker")?;

    let mut subscriptions = vec![client.subscribe_notifications(user_id, |n| {
        info!(id = n.id, title = %n.title, kind = ?n.kind, "notification");
    })];
    if let Some(conversation_id) = conversation_id {
        subscriptions.push(client.subscribe_chat(conversation_id, |m| {
            info!(conversation_id = %m.conversation_id, sender_id = %m.sender_id, message = %m.message, "chat message");
        }));
    }
    if let Some(invoice_id) = invoice_id {
        subscriptions.push(client.subscribe_invoice(invoice_id, |p| {
            info!(invoice_id = p.invoice_id, message = %p.message, "payment succeeded");
        }));
    }

    info!(topics = subscriptions.len(), "Probe running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    drop(subscriptions);
    client.disconnect();
    info!("Probe stopped");
    Ok(())
}
