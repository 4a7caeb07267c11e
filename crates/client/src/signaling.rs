use futures_util::{SinkExt, StreamExt};
use huddle_protocol::SignalingMessage;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::CallError;

/// WebSocket signaling channel, scoped to one room.
///
/// Owns the socket pump task. Outbound messages are queued through an
/// unbounded sender (cheap to clone into callbacks); inbound frames are
/// schema-validated here and delivered as [`SignalingMessage`]s — malformed
/// frames are dropped at this boundary and never reach the state machine.
///
/// Delivery semantics are the transport's: at-most-once, ordered within a
/// single sender's stream. No extra sequencing is added.
pub struct SignalingChannel {
    outbound: mpsc::UnboundedSender<SignalingMessage>,
    inbound: mpsc::UnboundedReceiver<SignalingMessage>,
    shutdown: Option<oneshot::Sender<()>>,
    pump: JoinHandle<()>,
}

impl SignalingChannel {
    /// Open the transport and announce ourselves to the room with a `join`.
    pub async fn connect(url: &str, room: &str, local_id: &str) -> Result<Self, CallError> {
        let ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default()
            .max_message_size(Some(262_144)); // SDP payloads stay well under this

        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        info!(url, room, "Connected to signaling server");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let join = SignalingMessage::Join {
            room: room.to_string(),
            user_id: local_id.to_string(),
        };
        ws_tx.send(Message::Text(join.encode()?.into())).await?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = ws_rx.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match SignalingMessage::decode(text.as_str()) {
                                    Ok(msg) => {
                                        if in_tx.send(msg).is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => warn!("Dropping malformed signaling frame: {e}"),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Signaling connection closed by server");
                                break;
                            }
                            Some(Ok(_)) => {
                                debug!("Ignoring non-text signaling frame");
                            }
                            Some(Err(e)) => {
                                warn!("Signaling transport error: {e}");
                                break;
                            }
                        }
                    }
                    out = out_rx.recv() => {
                        match out {
                            Some(msg) => {
                                let text = match msg.encode() {
                                    Ok(text) => text,
                                    Err(e) => {
                                        warn!("Failed to encode outbound signal: {e}");
                                        continue;
                                    }
                                };
                                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                                    warn!("Failed to send signaling frame: {e}");
                                    break;
                                }
                            }
                            None => {
                                let _ = ws_tx.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
            shutdown: Some(shutdown_tx),
            pump,
        })
    }

    /// Handle for queueing outbound messages; clones freely into callbacks.
    pub fn sender(&self) -> mpsc::UnboundedSender<SignalingMessage> {
        self.outbound.clone()
    }

    /// Next validated inbound message; None once the transport is gone.
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        self.inbound.recv().await
    }

    /// Hand out the raw channel halves (for feeding an orchestrator run
    /// loop). The pump task keeps running until the socket closes.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<SignalingMessage>,
        mpsc::UnboundedReceiver<SignalingMessage>,
    ) {
        (self.outbound, self.inbound)
    }

    /// Send a close frame and wait for the pump to finish.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.pump.await;
    }
}
