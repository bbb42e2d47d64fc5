//! End-to-end tests against the in-memory broker

use realtime_client::frame::Command;
use realtime_client::transport::memory::{BrokerConnection, MemoryBroker, MemoryTransport};
use realtime_client::{
    ChatMessageRequest, ConnectionStatus, RealtimeClient, RealtimeConfig, RealtimeError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

fn test_client() -> (RealtimeClient, MemoryBroker) {
    let (transport, broker) = MemoryTransport::new();
    let config = RealtimeConfig {
        heartbeat_outgoing: Duration::ZERO,
        ..Default::default()
    };
    (RealtimeClient::new(config, Arc::new(transport)), broker)
}

async fn connect(client: &RealtimeClient, broker: &mut MemoryBroker) -> BrokerConnection {
    let (result, conn) = tokio::join!(client.connect(), async {
        let mut conn = broker.accept().await.expect("client opened a link");
        conn.accept_handshake().await.expect("client sent CONNECT");
        conn
    });
    result.expect("handshake succeeded");
    conn
}

/// Read the next SUBSCRIBE and return its subscription id
async fn expect_subscribe(conn: &mut BrokerConnection, destination: &str) -> String {
    let frame = conn.recv_frame().await.expect("SUBSCRIBE frame");
    assert_eq!(frame.command, Command::Subscribe);
    assert_eq!(frame.header("destination"), Some(destination));
    frame.header("id").expect("subscription id").to_string()
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("event delivered in time")
        .expect("channel open")
}

fn chat_body(conversation_id: i64, message: &str) -> String {
    format!(r#"{{"conversationId": {conversation_id}, "senderId": 7, "message": "{message}"}}"#)
}

#[tokio::test]
async fn test_shared_topic_survives_one_consumer_leaving() {
    let (client, mut broker) = test_client();
    let mut conn = connect(&client, &mut broker).await;

    let (a_tx, mut a_rx) = mpsc::unbounded_channel();
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    let a = client.subscribe_chat(42, move |m| {
        let _ = a_tx.send(m.message.clone());
    });
    let _b = client.subscribe_chat(42, move |m| {
        let _ = b_tx.send(m.message.clone());
    });
    let id = expect_subscribe(&mut conn, "chat/42").await;

    conn.publish(&id, "chat/42", &chat_body(42, "first"));
    assert_eq!(next(&mut a_rx).await, "first");
    assert_eq!(next(&mut b_rx).await, "first");

    a.unsubscribe();
    assert!(conn.try_recv_frame().is_none(), "topic must stay subscribed");

    conn.publish(&id, "chat/42", &chat_body(42, "second"));
    assert_eq!(next(&mut b_rx).await, "second");
    assert!(a_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_string_conversation_ids_are_delivered() {
    let (client, mut broker) = test_client();
    let mut conn = connect(&client, &mut broker).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe_chat("ward-3", move |m| {
        let _ = tx.send((m.conversation_id.clone(), m.sender_id.clone()));
    });
    let id = expect_subscribe(&mut conn, "chat/ward-3").await;

    conn.publish(
        &id,
        "chat/ward-3",
        r#"{"conversationId": "ward-3", "senderId": "nurse-1", "message": "hi"}"#,
    );
    assert_eq!(
        next(&mut rx).await,
        ("ward-3".to_string(), "nurse-1".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_broker_triggers_reconnect() {
    let (client, mut broker) = test_client();
    let (result, _conn) = tokio::join!(client.connect(), async {
        let mut conn = broker.accept().await.expect("client opened a link");
        conn.accept_handshake_with("10000,10000")
            .await
            .expect("client sent CONNECT");
        conn
    });
    tokio_test::assert_ok!(result);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!client.is_connected());
    assert_ne!(client.state().status, ConnectionStatus::Connected);
    assert!(broker.opened() >= 2, "reconnect attempts follow the lost link");
    client.disconnect();
}

#[tokio::test]
async fn test_subscribe_before_connect_delivers_nothing() {
    let (client, mut broker) = test_client();
    let (tx, mut rx) = mpsc::unbounded_channel::<i64>();

    let early = client.subscribe_notifications(5, move |n| {
        let _ = tx.send(n.id);
    });
    assert!(!early.is_active());

    let mut conn = connect(&client, &mut broker).await;
    assert!(client.multiplexer().active_topics().is_empty());

    // A fresh subscription is the only way in; the early one stays inert.
    let (tx, mut late_rx) = mpsc::unbounded_channel::<i64>();
    let _late = client.subscribe_notifications(5, move |n| {
        let _ = tx.send(n.id);
    });
    let id = expect_subscribe(&mut conn, "notifications/book.5").await;
    conn.publish(&id, "notifications/book.5", r#"{"id": 11, "title": "Booked"}"#);

    assert_eq!(next(&mut late_rx).await, 11);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_publish_requires_connection() {
    let (client, mut broker) = test_client();
    let request = ChatMessageRequest::new(42, 7, "hello");

    let err = client.publish_chat_message(&request, "token").unwrap_err();
    assert!(matches!(err, RealtimeError::NotConnected));
    assert_eq!(broker.opened(), 0);

    let mut conn = connect(&client, &mut broker).await;
    tokio_test::assert_ok!(client.publish_chat_message(&request, "token"));

    let frame = conn.recv_frame().await.unwrap();
    assert_eq!(frame.command, Command::Send);
    assert_eq!(frame.header("destination"), Some("app/chat.send"));
    assert_eq!(frame.header("Authorization"), Some("Bearer token"));
    let body: serde_json::Value = serde_json::from_str(&frame.body).unwrap();
    assert_eq!(body["conversationId"], 42);
    assert_eq!(body["message"], "hello");

    client.disconnect();
    let err = client.publish_chat_message(&request, "token").unwrap_err();
    assert!(matches!(err, RealtimeError::NotConnected));
}

#[tokio::test]
async fn test_invoice_only_delivers_payment_success() {
    let (client, mut broker) = test_client();
    let mut conn = connect(&client, &mut broker).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let _sub = client.subscribe_invoice(9, move |p| {
        let _ = tx.send(p.message.clone());
    });
    let id = expect_subscribe(&mut conn, "invoice.9").await;

    conn.publish(&id, "invoice.9", r#"{"event": "PAYMENT_FAILED", "message": "declined", "invoiceId": 9}"#);
    conn.publish(&id, "invoice.9", "not json at all");
    conn.publish(&id, "invoice.9", r#"{"event": "PAYMENT_SUCCESS", "message": "paid", "invoiceId": 9}"#);

    assert_eq!(next(&mut rx).await, "paid");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_panicking_consumer_is_isolated() {
    let (client, mut broker) = test_client();
    let mut conn = connect(&client, &mut broker).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let _bad = client.subscribe_chat(1, |_| panic!("consumer bug"));
    let _good = client.subscribe_chat(1, move |m| {
        let _ = tx.send(m.message.clone());
    });
    let id = expect_subscribe(&mut conn, "chat/1").await;

    conn.publish(&id, "chat/1", &chat_body(1, "one"));
    conn.publish(&id, "chat/1", &chat_body(1, "two"));
    assert_eq!(next(&mut rx).await, "one");
    assert_eq!(next(&mut rx).await, "two");
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_disconnect_tears_down_registrations() {
    let (client, mut broker) = test_client();
    let mut conn = connect(&client, &mut broker).await;

    let chat = client.subscribe_chat(3, |_| {});
    let _notes = client.subscribe_notifications(4, |_| {});
    expect_subscribe(&mut conn, "chat/3").await;
    expect_subscribe(&mut conn, "notifications/book.4").await;

    client.disconnect();
    assert_eq!(conn.recv_frame().await.unwrap().command, Command::Unsubscribe);
    assert_eq!(conn.recv_frame().await.unwrap().command, Command::Unsubscribe);
    assert_eq!(conn.recv_frame().await.unwrap().command, Command::Disconnect);
    assert!(conn.recv_frame().await.is_none());

    assert!(!client.is_connected());
    assert!(!chat.is_active());
    assert_eq!(client.state().status, ConnectionStatus::Disconnected);
    client.disconnect();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_restores_subscriptions() {
    let (client, mut broker) = test_client();
    let mut old_conn = connect(&client, &mut broker).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe_chat(42, move |m| {
        let _ = tx.send(m.message.clone());
    });
    let id = expect_subscribe(&mut old_conn, "chat/42").await;

    old_conn.close();
    let mut conn = broker.accept().await.expect("reconnect attempt");
    conn.accept_handshake().await.unwrap();

    let restored = expect_subscribe(&mut conn, "chat/42").await;
    assert_eq!(restored, id);
    assert_eq!(client.state().generation, 2);

    conn.publish(&restored, "chat/42", &chat_body(42, "after reconnect"));
    assert_eq!(next(&mut rx).await, "after reconnect");
}

#[tokio::test(start_paused = true)]
async fn test_broker_error_frame_triggers_reconnect() {
    let (client, mut broker) = test_client();
    let conn = connect(&client, &mut broker).await;
    let mut state = client.watch_state();

    conn.send_frame(
        &realtime_client::frame::Frame::new(Command::Error).with_header("message", "session expired"),
    );
    state
        .wait_for(|s| s.status == ConnectionStatus::Reconnecting)
        .await
        .unwrap();
    assert!(!client.is_connected());

    let mut next_conn = broker.accept().await.unwrap();
    next_conn.accept_handshake().await.unwrap();
    state
        .wait_for(|s| s.status == ConnectionStatus::Connected && s.generation == 2)
        .await
        .unwrap();
    client.disconnect();
}
