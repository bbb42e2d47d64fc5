//! Physical duplex connections to the broker
//!
//! A [`Transport`] opens a [`Link`]: a pair of channels carrying raw text
//! messages. Dropping the outbound sender closes the connection. The session
//! never touches sockets directly, which keeps it testable against the
//! in-process [`memory`] transport.

use crate::error::ConnectionError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Once;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Something that happened on the inbound side of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Closed(Option<String>),
    Error(String),
}

pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<Link, ConnectionError>;
}

/// Install the rustls provider for `wss://` brokers unless the host already did
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider().install_default().is_err() {
            debug!("rustls crypto provider already installed");
        }
    });
}

/// WebSocket transport backed by tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Link, ConnectionError> {
        if url.starts_with("wss://") {
            install_crypto_provider();
        }
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        debug!(url, "WebSocket opened");

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "WebSocket write failed");
                    return;
                }
            }
            // Session dropped its sender: close politely.
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => TransportEvent::Text(text.as_str().to_owned()),
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.as_str().to_owned());
                        let _ = in_tx.send(TransportEvent::Closed(reason));
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                };
                if in_tx.send(event).is_err() {
                    return;
                }
            }
            let _ = in_tx.send(TransportEvent::Closed(None));
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

pub mod memory {
    //! In-process transport with a scriptable broker end

    use super::{Link, Transport, TransportEvent};
    use crate::error::ConnectionError;
    use crate::frame::{decode_frames, is_heartbeat, Command, Frame};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Client half, handed to the session
    #[derive(Clone)]
    pub struct MemoryTransport {
        accepted: mpsc::UnboundedSender<BrokerConnection>,
        refusals: Arc<AtomicUsize>,
        opened: Arc<AtomicUsize>,
    }

    /// Broker half, driven by the test or embedding application
    pub struct MemoryBroker {
        incoming: mpsc::UnboundedReceiver<BrokerConnection>,
        refusals: Arc<AtomicUsize>,
        opened: Arc<AtomicUsize>,
    }

    impl MemoryTransport {
        pub fn new() -> (Self, MemoryBroker) {
            let (tx, rx) = mpsc::unbounded_channel();
            let refusals = Arc::new(AtomicUsize::new(0));
            let opened = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    accepted: tx,
                    refusals: refusals.clone(),
                    opened: opened.clone(),
                },
                MemoryBroker {
                    incoming: rx,
                    refusals,
                    opened,
                },
            )
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn open(&self, _url: &str) -> Result<Link, ConnectionError> {
            let refused = self
                .refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(ConnectionError::Transport("connection refused".into()));
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.accepted
                .send(BrokerConnection {
                    from_client: out_rx,
                    to_client: in_tx,
                })
                .map_err(|_| ConnectionError::Transport("broker is gone".into()))?;
            self.opened.fetch_add(1, Ordering::SeqCst);

            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    impl MemoryBroker {
        /// Wait for the next client connection
        pub async fn accept(&mut self) -> Option<BrokerConnection> {
            self.incoming.recv().await
        }

        pub fn try_accept(&mut self) -> Option<BrokerConnection> {
            self.incoming.try_recv().ok()
        }

        /// Refuse the next `n` open attempts at socket level
        pub fn refuse_next(&self, n: usize) {
            self.refusals.store(n, Ordering::SeqCst);
        }

        /// Number of links successfully opened so far
        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }
    }

    pub struct BrokerConnection {
        from_client: mpsc::UnboundedReceiver<String>,
        to_client: mpsc::UnboundedSender<TransportEvent>,
    }

    impl BrokerConnection {
        /// Next frame sent by the client, skipping heart-beats; `None` once closed
        pub async fn recv_frame(&mut self) -> Option<Frame> {
            loop {
                let text = self.from_client.recv().await?;
                if let Some(frame) = first_frame(&text) {
                    return Some(frame);
                }
            }
        }

        /// Non-blocking variant of [`recv_frame`](Self::recv_frame)
        pub fn try_recv_frame(&mut self) -> Option<Frame> {
            while let Ok(text) = self.from_client.try_recv() {
                if let Some(frame) = first_frame(&text) {
                    return Some(frame);
                }
            }
            None
        }

        /// Read the CONNECT frame and acknowledge it without heart-beating
        pub async fn accept_handshake(&mut self) -> Option<Frame> {
            self.accept_handshake_with("0,0").await
        }

        /// Acknowledge the CONNECT frame advertising `heart_beat` (`sx,sy` in ms)
        pub async fn accept_handshake_with(&mut self, heart_beat: &str) -> Option<Frame> {
            let connect = self.recv_frame().await?;
            if connect.command != Command::Connect {
                return None;
            }
            self.send_frame(
                &Frame::new(Command::Connected)
                    .with_header("version", "1.2")
                    .with_header("heart-beat", heart_beat),
            );
            Some(connect)
        }

        /// Read the CONNECT frame and reject it with an ERROR frame
        pub async fn reject_handshake(&mut self, message: &str) -> Option<Frame> {
            let connect = self.recv_frame().await?;
            self.send_frame(&Frame::new(Command::Error).with_header("message", message));
            Some(connect)
        }

        pub fn send_frame(&self, frame: &Frame) {
            self.send_text(frame.encode());
        }

        pub fn send_text(&self, text: impl Into<String>) {
            let _ = self.to_client.send(TransportEvent::Text(text.into()));
        }

        /// Deliver a MESSAGE frame on a client subscription
        pub fn publish(&self, subscription_id: &str, destination: &str, body: &str) {
            self.send_frame(
                &Frame::new(Command::Message)
                    .with_header("subscription", subscription_id)
                    .with_header("destination", destination)
                    .with_body(body),
            );
        }

        /// Simulate the socket dropping
        pub fn close(&self) {
            let _ = self.to_client.send(TransportEvent::Closed(None));
        }

        pub fn fail(&self, error: &str) {
            let _ = self.to_client.send(TransportEvent::Error(error.to_string()));
        }
    }

    fn first_frame(text: &str) -> Option<Frame> {
        if is_heartbeat(text) {
            return None;
        }
        decode_frames(text).into_iter().next().and_then(Result::ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_provider_installed_once() {
        install_crypto_provider();
        install_crypto_provider();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
    }
}
