//! Text-frame transport over a WebSocket.
//!
//! The socket is split into two pump tasks bridged to channels, so the rest of
//! the client only sees `String` frames going out and [`TransportEvent`]s
//! coming in. [`Transport::in_memory`] gives the same shape without a socket.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

use crate::error::ConnectionError;

const CHANNEL_CAPACITY: usize = 256;

/// What the transport reports to its reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete text frame.
    Text(String),
    /// The socket closed, with the peer's close reason when it sent one.
    Closed(Option<String>),
    /// The socket failed. No further events follow except `Closed`.
    Error(String),
}

/// Bidirectional text-frame channel to the gateway.
pub struct Transport {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<TransportEvent>,
}

/// The far side of an in-memory [`Transport`].
pub struct TransportPeer {
    /// Frames the client sent.
    pub sent: mpsc::Receiver<String>,
    /// Feed frames and closure to the client.
    pub events: mpsc::Sender<TransportEvent>,
}

impl Transport {
    pub fn from_channels(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// A transport whose other end is held by the caller.
    pub fn in_memory() -> (Self, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self::from_channels(outbound_tx, inbound_rx),
            TransportPeer {
                sent: outbound_rx,
                events: inbound_tx,
            },
        )
    }

    /// Open a WebSocket to `url` and start the pump tasks.
    ///
    /// Dropping every clone of the outbound sender closes the socket.
    pub async fn connect(url: &Url) -> Result<Self, ConnectionError> {
        if url.scheme() == "wss" {
            // Already installed by an earlier connect, or by the host process.
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        }

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Unreachable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!(%url, "websocket open");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);
        let (mut ws_sender, mut ws_receiver) = socket.split();

        // Forward outbound frames to the socket
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = ws_sender.send(WsMessage::Text(text.into())).await {
                    warn!(error = %e, "websocket send failed");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Forward socket frames to the inbound channel
        tokio::spawn(async move {
            let reason = loop {
                match ws_receiver.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        if inbound_tx
                            .send(TransportEvent::Text(text.as_str().to_owned()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            if inbound_tx.send(TransportEvent::Text(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => debug!("dropping non-utf8 binary frame"),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        break frame.map(|f| format!("{} {}", u16::from(f.code), &*f.reason));
                    }
                    Some(Ok(_)) => {
                        // Ping, pong and raw frames are handled by tungstenite
                    }
                    Some(Err(e)) => {
                        let _ = inbound_tx.send(TransportEvent::Error(e.to_string())).await;
                        break None;
                    }
                    None => break None,
                }
            };
            debug!(?reason, "websocket closed");
            let _ = inbound_tx.send(TransportEvent::Closed(reason)).await;
        });

        Ok(Self::from_channels(outbound_tx, inbound_rx))
    }

    pub(crate) fn into_parts(self) -> (mpsc::Sender<String>, mpsc::Receiver<TransportEvent>) {
        (self.outbound, self.inbound)
    }
}

impl TransportPeer {
    /// Next frame the client sent, parsed as JSON. `None` once the client
    /// has dropped its side.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let text = self.sent.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Deliver one text frame to the client.
    pub async fn push(&self, frame: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Text(frame.into())).await.is_ok()
    }

    /// Report the socket as closed to the client.
    pub async fn close(&self, reason: Option<&str>) -> bool {
        self.events
            .send(TransportEvent::Closed(reason.map(String::from)))
            .await
            .is_ok()
    }
}
