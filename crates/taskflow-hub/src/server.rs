//! TCP accept loop. Each accepted socket gets its own task.

use std::time::Duration;

use taskflow_common::TaskflowError;
use taskflow_config::HubConfig;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use crate::connection::handle_connection;
use crate::hub::Hub;

/// Bind the listener described by `config.server`.
pub async fn bind(config: &HubConfig) -> Result<TcpListener, TaskflowError> {
    let addr = config.server.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("taskflow-hub listening on {}", addr);
    Ok(listener)
}

/// Accept connections forever.
pub async fn serve(listener: TcpListener, hub: Hub, hello_timeout: Duration) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let hub = hub.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, hub, hello_timeout).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use taskflow_common::{ClientMessage, ConnectionHandle, ServerMessage, Signal};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = Hub::start(&HubConfig::default());
        tokio::spawn(serve(listener, hub, Duration::from_millis(500)));
        format!("ws://{addr}")
    }

    async fn send(ws: &mut Client, msg: &ClientMessage) {
        let json = serde_json::to_string(msg).unwrap();
        ws.send(Message::Text(json.into())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .expect("ws error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn hello(url: &str, user: &str) -> (Client, ConnectionHandle) {
        let (mut ws, _) = connect_async(url).await.unwrap();
        send(
            &mut ws,
            &ClientMessage::Hello {
                user_id: user.into(),
                display_name: user.into(),
                avatar: None,
            },
        )
        .await;
        match recv(&mut ws).await {
            ServerMessage::Welcome { handle } => (ws, handle),
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    fn join() -> ClientMessage {
        ClientMessage::JoinVoice {
            channel: "voice-1".into(),
            muted: false,
        }
    }

    #[tokio::test]
    async fn two_clients_meet_and_exchange_an_offer() {
        let url = start().await;
        let (mut a, ha) = hello(&url, "u1").await;
        let (mut b, hb) = hello(&url, "u2").await;

        send(&mut a, &join()).await;
        assert!(matches!(recv(&mut a).await, ServerMessage::Roster { .. }));
        send(&mut b, &join()).await;
        for ws in [&mut a, &mut b] {
            match recv(ws).await {
                ServerMessage::Roster { participants, .. } => assert_eq!(participants.len(), 2),
                other => panic!("unexpected {other:?}"),
            }
        }

        send(
            &mut a,
            &ClientMessage::RelaySignal {
                channel: "voice-1".into(),
                to: hb.clone(),
                signal: Signal::Offer { sdp: "v=0".into() },
            },
        )
        .await;
        match recv(&mut b).await {
            ServerMessage::Signal { envelope } => {
                assert_eq!(envelope.from, ha);
                assert_eq!(envelope.to, hb);
            }
            other => panic!("unexpected {other:?}"),
        }

        a.close(None).await.unwrap();
        match recv(&mut b).await {
            ServerMessage::Roster { participants, .. } => {
                assert_eq!(participants.len(), 1);
                assert_eq!(participants[0].handle, hb);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_and_connection_survives() {
        let url = start().await;
        let (mut a, _) = hello(&url, "u1").await;

        a.send(Message::Text("{not json".into())).await.unwrap();
        assert!(matches!(recv(&mut a).await, ServerMessage::Error { .. }));

        send(&mut a, &ClientMessage::Subscribe { channel: "general".into() }).await;
        send(
            &mut a,
            &ClientMessage::Hello {
                user_id: "u1".into(),
                display_name: "u1".into(),
                avatar: None,
            },
        )
        .await;
        assert!(matches!(recv(&mut a).await, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn non_hello_first_frame_is_rejected() {
        let url = start().await;
        let (mut ws, _) = connect_async(&url).await.unwrap();
        send(&mut ws, &ClientMessage::Subscribe { channel: "general".into() }).await;
        match recv(&mut ws).await {
            ServerMessage::Error { message } => assert!(message.contains("hello")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
