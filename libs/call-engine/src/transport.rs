use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use shared_proto::signaling::{is_supported_protocol_version, SignalingMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::error::CallError;

/// What the transport delivers to its single registered handler.
#[derive(Debug)]
pub enum TransportEvent {
    Message(SignalingMessage),
    /// The connection is gone. The owner decides whether to reconnect.
    Closed,
}

#[derive(Debug)]
pub(crate) enum OutboundFrame {
    Signal(SignalingMessage),
    Close,
}

/// Cheap clonable handle for sending frames. Sending is fire-and-forget:
/// when the transport is not open the frame is logged and dropped, never
/// surfaced as an error to the caller.
#[derive(Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    open: Arc<AtomicBool>,
}

impl SignalingSender {
    pub fn send(&self, message: SignalingMessage) {
        if !self.open.load(Ordering::SeqCst) {
            tracing::warn!(
                component = "ws.transport",
                kind = message.kind(),
                room_id = message.room_id(),
                "transport not open, dropping outbound frame"
            );
            return;
        }
        if self.tx.send(OutboundFrame::Signal(message)).is_err() {
            tracing::warn!(
                component = "ws.transport",
                "write task gone, dropping outbound frame"
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Sender wired to a bare channel instead of a socket, for driving the
    /// engine without a relay.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = raw_rx.recv().await {
                if let OutboundFrame::Signal(msg) = frame {
                    if out_tx.send(msg).is_err() {
                        break;
                    }
                }
            }
        });
        (
            Self {
                tx: raw_tx,
                open: Arc::new(AtomicBool::new(true)),
            },
            out_rx,
        )
    }
}

/// One persistent duplex connection to the relay, scoped to a user (and
/// optionally a room) through query parameters. Reconnecting is the
/// owner's call, not the transport's.
pub struct SignalingTransport {
    sender: SignalingSender,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl SignalingTransport {
    /// Open the connection and resolve once frames can be sent. Every
    /// well-formed inbound frame goes to `events`; malformed payloads and
    /// unsupported protocol versions are dropped with a warning.
    pub async fn connect(
        server_url: &str,
        user_id: &str,
        room_id: Option<&str>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, CallError> {
        let url = signaling_url(server_url, user_id, room_id)?;

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| CallError::transport(format!("failed to connect: {e}")))?;

        tracing::info!(
            component = "ws.transport",
            user_id = %user_id,
            room_id = room_id.unwrap_or(""),
            "connected to signaling relay"
        );

        let (mut write, mut read) = ws_stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

        let write_open = open.clone();
        let write_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match frame {
                    OutboundFrame::Signal(msg) => {
                        let text = match serde_json::to_string(&msg) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!(component = "ws.transport", error = %e, "failed to serialize frame");
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::warn!(component = "ws.transport", error = %e, "write failed, closing");
                            write_open.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    OutboundFrame::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let read_open = open.clone();
        let read_task = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SignalingMessage>(&text) {
                        Ok(msg) if is_supported_protocol_version(msg.version()) => {
                            if events.send(TransportEvent::Message(msg)).is_err() {
                                break;
                            }
                        }
                        Ok(msg) => {
                            tracing::warn!(
                                component = "ws.transport",
                                kind = msg.kind(),
                                version = msg.version(),
                                "dropping frame with unsupported protocol version"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(component = "ws.transport", error = %e, "dropping malformed frame");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!(component = "ws.transport", "relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(component = "ws.transport", error = %e, "read failed");
                        break;
                    }
                    _ => {}
                }
            }
            read_open.store(false, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Closed);
        });

        Ok(Self {
            sender: SignalingSender { tx, open },
            read_task,
            write_task,
        })
    }

    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Close the connection. Idempotent; later `send` calls drop their
    /// frames.
    pub fn disconnect(&self) {
        if self.sender.open.swap(false, Ordering::SeqCst) {
            let _ = self.sender.tx.send(OutboundFrame::Close);
        }
    }
}

impl Drop for SignalingTransport {
    fn drop(&mut self) {
        self.disconnect();
        self.read_task.abort();
        self.write_task.abort();
    }
}

/// Connection URL with identity carried as query parameters.
fn signaling_url(server_url: &str, user_id: &str, room_id: Option<&str>) -> Result<url::Url, CallError> {
    let mut url = url::Url::parse(server_url)
        .map_err(|e| CallError::transport(format!("invalid signaling url: {e}")))?;
    url.query_pairs_mut().append_pair("userId", user_id);
    if let Some(room_id) = room_id {
        url.query_pairs_mut().append_pair("roomId", room_id);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_identity_query_params() {
        let url = signaling_url("ws://127.0.0.1:3000/ws", "alice", Some("room1")).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:3000/ws?userId=alice&roomId=room1"
        );

        let url = signaling_url("ws://127.0.0.1:3000/ws", "alice", None).unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:3000/ws?userId=alice");
    }

    #[test]
    fn invalid_url_is_a_transport_error() {
        assert!(matches!(
            signaling_url("not a url", "alice", None),
            Err(CallError::Transport(_))
        ));
    }
}
