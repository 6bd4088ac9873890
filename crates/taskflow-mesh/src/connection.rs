//! Background tasks behind a `HubClient`.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use taskflow_common::{ClientMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Drain queued commands onto the socket until the queue or socket closes.
pub(crate) async fn writer_task(
    mut write: SplitSink<Ws, WsMessage>,
    mut command_rx: mpsc::UnboundedReceiver<ClientMessage>,
) {
    while let Some(msg) = command_rx.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize client frame");
                continue;
            }
        };
        if let Err(e) = write.send(WsMessage::Text(json.into())).await {
            debug!(error = %e, "Hub write failed");
            break;
        }
    }
    let _ = write.close().await;
}

/// Parse hub frames and hand them to the application.
pub(crate) async fn reader_task(
    mut read: SplitStream<Ws>,
    event_tx: mpsc::UnboundedSender<ServerMessage>,
    connected: Arc<RwLock<bool>>,
) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                Ok(msg) => {
                    if event_tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => debug!(error = %e, "Unrecognized frame from hub"),
            },
            Ok(WsMessage::Close(_)) => {
                info!("Hub closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }
    *connected.write().await = false;
}
