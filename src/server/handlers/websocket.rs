use std::fmt::Display;

use axum::{
    extract::{
        State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, error, warn};

use crate::gateway::ReaderLink;
use crate::server::AppState;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_reader(socket, state))
}

async fn serve_reader(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    bridge(state.gateway.open(), sink, stream).await;
}

/// Bridges one socket to its connection task until either side goes away.
async fn bridge<Si, St, E>(link: ReaderLink, mut sink: Si, mut stream: St)
where
    Si: Sink<WsMessage> + Unpin + Send + 'static,
    St: Stream<Item = Result<WsMessage, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let ReaderLink {
        id,
        frames,
        mut outbound,
        task: _,
    } = link;

    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!(connection = %id, "Failed to encode frame: {e}");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                debug!(connection = %id, "Failed to write frame");
                break;
            }
        }
        let _ = sink.send(WsMessage::Close(None)).await;
    });

    let reader_frames = frames.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(received) = stream.next().await {
            match received {
                Ok(WsMessage::Text(text)) => {
                    if !reader_frames.push(text.as_str()) {
                        break;
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(WsMessage::Binary(_)) => {
                    warn!(connection = %id, "Ignoring binary frame");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(connection = %id, "Socket error: {e}");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => {
            reader.abort();
            frames.close();
        }
        _ = &mut reader => {
            frames.close();
            let _ = writer.await;
        }
    }
    debug!(connection = %id, "Socket closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{sink, stream};

    use super::*;
    use crate::config::GatewayConfig;
    use crate::domain::MemoryStore;
    use crate::gateway::{ConnectionManager, GatewayServices};

    #[tokio::test]
    async fn test_broken_sink_removes_connection() {
        let manager = ConnectionManager::new(GatewayServices::from_store(
            MemoryStore::new(),
            GatewayConfig::default(),
        ));
        let link = manager.open();
        let frames = link.frames.clone();
        let broken = Box::pin(sink::unfold((), |(), _: WsMessage| async {
            Err::<(), _>("broken pipe")
        }));
        let silent = stream::pending::<Result<WsMessage, axum::Error>>();
        let bridged = tokio::spawn(bridge(link, broken, silent));
        assert_eq!(manager.connection_count(), 1);

        frames.push(r#"{"event":"EVENT","data":{"type":"REGISTER","payload":{}}}"#);

        tokio::time::timeout(Duration::from_secs(3), bridged)
            .await
            .expect("bridge did not finish")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(3), async {
            while manager.connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection was not removed");
    }
}
