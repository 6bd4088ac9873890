//! Per-connection handler: read hello, register, then pump frames.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use taskflow_common::{ClientMessage, ProtocolError, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::hub::Hub;
use crate::registry::Identity;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Drive one WebSocket connection until either side closes it.
pub async fn handle_connection(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    hub: Hub,
    hello_timeout: Duration,
) {
    let (mut sink, mut stream) = ws.split();

    // 1. The first frame must identify the user.
    let identity = match read_hello(&mut stream, hello_timeout).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(peer = %addr, error = %e, "Rejecting connection");
            let _ = send_frame(
                &mut sink,
                &ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            let _ = sink.close().await;
            return;
        }
    };

    // 2. Register. The outbound queue already holds `welcome`.
    let (handle, mut rx) = hub.connect(identity).await;
    tracing::debug!(peer = %addr, handle = %handle, "Connection registered");

    // 3. Pump frames both ways.
    loop {
        tokio::select! {
            msg = rx.recv() => {
                // None: the hub dropped this connection (slow consumer).
                let Some(msg) = msg else {
                    tracing::info!(peer = %addr, handle = %handle, "Outbound queue released; closing");
                    let _ = sink.close().await;
                    break;
                };
                if send_frame(&mut sink, &msg).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(msg) => hub.dispatch(&handle, msg).await,
                            Err(e) => {
                                tracing::debug!(handle = %handle, error = %e, "Malformed frame");
                                let reply = ServerMessage::Error {
                                    message: ProtocolError::Malformed(e.to_string()).to_string(),
                                };
                                if send_frame(&mut sink, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 4. Cleanup happens in the lifecycle manager.
    hub.disconnect(&handle).await;
}

/// Wait for the `hello` frame and turn it into an identity.
async fn read_hello(stream: &mut WsStream, timeout: Duration) -> Result<Identity, ProtocolError> {
    let frame = tokio::time::timeout(timeout, stream.next())
        .await
        .map_err(|_| ProtocolError::HelloTimeout(timeout.as_secs()))?;

    match frame {
        Some(Ok(Message::Text(text))) => {
            match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Hello {
                    user_id,
                    display_name,
                    avatar,
                }) => Ok(Identity {
                    user_id,
                    display_name,
                    avatar,
                }),
                Ok(_) => Err(ProtocolError::UnexpectedFrame(
                    "expected hello as first frame".into(),
                )),
                Err(e) => Err(ProtocolError::Malformed(e.to_string())),
            }
        }
        Some(Ok(_)) => Err(ProtocolError::UnexpectedFrame(
            "expected text hello".into(),
        )),
        Some(Err(e)) => Err(ProtocolError::Malformed(e.to_string())),
        None => Err(ProtocolError::UnexpectedFrame(
            "closed before hello".into(),
        )),
    }
}

/// Serialize a frame and write it as a JSON text message.
async fn send_frame(
    sink: &mut WsSink,
    msg: &ServerMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server frame");
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await
}
