//! WebSocket client for the network bridge.
//!
//! One socket per session. A reader task turns bridge frames into
//! `TransportEvent`s and resolves send acknowledgements; writes go through
//! a shared sink guarded by an async mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use nudge_core::config::ConnectionConfig;
use nudge_core::error::{NudgeError, Result};
use nudge_core::traits::Transport;
use nudge_core::types::{CloseReason, Credentials, TransportEvent};

use super::protocol::{BridgeFrame, ClientFrame, close_reason};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type PendingAcks = Arc<Mutex<HashMap<String, oneshot::Sender<std::result::Result<(), String>>>>>;

/// Transport that talks to the chat network through a WebSocket bridge.
pub struct BridgeTransport {
    url: String,
    ack_timeout: Duration,
    writer: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    pending: PendingAcks,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeTransport {
    pub fn new(url: impl Into<String>, ack_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            ack_timeout,
            writer: Arc::new(tokio::sync::Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            reader: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            config.bridge_url.clone(),
            Duration::from_secs(config.ack_timeout_secs),
        )
    }

    async fn write_frame(&self, frame: &ClientFrame) -> Result<()> {
        let json = serde_json::to_string(frame)?;
        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| NudgeError::transport("bridge not connected"))?;
        sink.send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| NudgeError::transport(format!("bridge write failed: {e}")))
    }

    fn stop_reader(&self) {
        if let Ok(mut reader) = self.reader.lock()
            && let Some(handle) = reader.take()
        {
            handle.abort();
        }
        fail_pending(&self.pending, "session restarted before ack");
    }

    fn forget_ack(&self, id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
    }
}

/// Read frames until the socket closes. Always ends the event stream with
/// exactly one `Closed` event.
async fn read_loop<S>(mut read: S, events: mpsc::Sender<TransportEvent>, pending: PendingAcks)
where
    S: futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let mut close = CloseReason::Transient("bridge connection closed".into());

    while let Some(msg) = read.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                let frame = match BridgeFrame::parse(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Ignoring unrecognised bridge frame: {e}");
                        continue;
                    }
                };
                let event = match frame {
                    BridgeFrame::Qr { code } => TransportEvent::ProvisioningCode(code),
                    BridgeFrame::Open { credentials } => TransportEvent::Authenticated(credentials),
                    BridgeFrame::Creds { credentials } => {
                        TransportEvent::CredentialsUpdated(credentials)
                    }
                    BridgeFrame::Ack { id, ok, error } => {
                        let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
                        match waiter {
                            Some(tx) => {
                                let result = if ok {
                                    Ok(())
                                } else {
                                    Err(error.unwrap_or_else(|| "rejected by network".into()))
                                };
                                let _ = tx.send(result);
                            }
                            None => tracing::debug!("Ack for unknown send id {id}"),
                        }
                        continue;
                    }
                    BridgeFrame::Close { reason } => {
                        close = close_reason(&reason);
                        break;
                    }
                };
                if events.send(event).await.is_err() {
                    // Receiver gone: nobody is managing this session any more.
                    return;
                }
            }
            Ok(WsMessage::Ping(data)) => {
                tracing::trace!("Bridge ping received ({} bytes)", data.len());
            }
            Ok(WsMessage::Close(frame)) => {
                tracing::info!("Bridge WebSocket closed: {:?}", frame);
                break;
            }
            Err(e) => {
                tracing::warn!("Bridge WebSocket error: {e}");
                close = CloseReason::Transient(e.to_string());
                break;
            }
            _ => {}
        }
    }

    fail_pending(&pending, "connection closed before ack");
    let _ = events.send(TransportEvent::Closed(close)).await;
}

/// Nobody will ack in-flight sends on a dead socket.
fn fail_pending(pending: &PendingAcks, reason: &str) {
    if let Ok(mut pending) = pending.lock() {
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        self.stop_reader();
        tracing::info!("Connecting to bridge: {}", self.url);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| NudgeError::transport(format!("WebSocket connect failed: {e}")))?;
        let (write, read) = ws_stream.split();
        *self.writer.lock().await = Some(write);

        let resuming = credentials.is_some();
        self.write_frame(&ClientFrame::Hello { credentials }).await?;
        tracing::info!(
            "Bridge WebSocket connected ({})",
            if resuming { "resuming session" } else { "new session" }
        );

        let (tx, rx) = mpsc::channel(32);
        let handle = tokio::spawn(read_loop(read, tx, self.pending.clone()));
        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(handle);
        }
        Ok(rx)
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<()> {
        let id = uuid::Uuid::new_v4().to_string();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|e| NudgeError::transport(format!("Lock: {e}")))?
            .insert(id.clone(), ack_tx);

        let frame = ClientFrame::Send {
            id: id.clone(),
            to: address.to_string(),
            text: text.to_string(),
        };
        if let Err(e) = self.write_frame(&frame).await {
            self.forget_ack(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.ack_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!("Bridge: message {id} delivered to {address}");
                Ok(())
            }
            Ok(Ok(Err(reason))) => Err(NudgeError::send_failed(address, reason)),
            Ok(Err(_)) => Err(NudgeError::transport("bridge dropped the send")),
            Err(_) => {
                self.forget_ack(&id);
                Err(NudgeError::transport(format!(
                    "no ack for {id} within {}s",
                    self.ack_timeout.as_secs()
                )))
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_reader();
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.close().await;
        }
        tracing::info!("Bridge: disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal bridge: accepts one socket and hands it to `script`.
    async fn fake_bridge<F, Fut>(script: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            script(ws).await;
        });
        format!("ws://{addr}")
    }

    async fn next_client_frame(ws: &mut WebSocketStream<TcpStream>) -> ClientFrame {
        loop {
            if let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn send_frame(ws: &mut WebSocketStream<TcpStream>, frame: serde_json::Value) {
        ws.send(WsMessage::Text(frame.to_string().into())).await.unwrap();
    }

    #[tokio::test]
    async fn test_provisioning_then_open() {
        let url = fake_bridge(|mut ws| async move {
            let hello = next_client_frame(&mut ws).await;
            assert_eq!(hello, ClientFrame::Hello { credentials: None });
            send_frame(&mut ws, serde_json::json!({"type": "qr", "code": "QR-1"})).await;
            send_frame(
                &mut ws,
                serde_json::json!({"type": "open", "credentials": {
                    "blob": {"me": "628"}, "updated_at": "2026-01-05T08:00:00Z"
                }}),
            )
            .await;
            send_frame(&mut ws, serde_json::json!({"type": "close", "reason": "logged_out"})).await;
        })
        .await;

        let transport = BridgeTransport::new(url, Duration::from_secs(5));
        let mut events = transport.connect(None).await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::ProvisioningCode("QR-1".into()))
        );
        let Some(TransportEvent::Authenticated(creds)) = events.recv().await else {
            panic!("expected authenticated event");
        };
        assert_eq!(creds.blob["me"], "628");
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Closed(CloseReason::LoggedOut))
        );
    }

    #[tokio::test]
    async fn test_send_is_acknowledged() {
        let url = fake_bridge(|mut ws| async move {
            let _hello = next_client_frame(&mut ws).await;
            for _ in 0..2 {
                let ClientFrame::Send { id, to, .. } = next_client_frame(&mut ws).await else {
                    panic!("expected send frame");
                };
                let ok = !to.starts_with("000");
                send_frame(
                    &mut ws,
                    serde_json::json!({"type": "ack", "id": id, "ok": ok, "error": "not on network"}),
                )
                .await;
            }
            // Keep the socket open until the client is done.
            let _ = ws.next().await;
        })
        .await;

        let transport = BridgeTransport::new(url, Duration::from_secs(5));
        let _events = transport
            .connect(Some(Credentials::new(serde_json::json!({}))))
            .await
            .unwrap();

        transport.send_text("628111@s.whatsapp.net", "hello").await.unwrap();
        let err = transport
            .send_text("000@s.whatsapp.net", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, NudgeError::SendFailed { .. }));
        assert!(err.to_string().contains("not on network"));
    }

    #[tokio::test]
    async fn test_disconnect_fails_in_flight_send() {
        let url = fake_bridge(|mut ws| async move {
            let _hello = next_client_frame(&mut ws).await;
            // Read the send but never ack it.
            let _send = next_client_frame(&mut ws).await;
            let _ = ws.next().await;
        })
        .await;

        let transport = Arc::new(BridgeTransport::new(url, Duration::from_secs(30)));
        let _events = transport.connect(None).await.unwrap();

        let in_flight = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send_text("628111@s.whatsapp.net", "hello").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        transport.disconnect().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(2), in_flight)
            .await
            .expect("send should not wait for the ack timeout")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, NudgeError::SendFailed { .. }));
        assert!(err.to_string().contains("session restarted"));
    }

    #[tokio::test]
    async fn test_socket_drop_is_transient_close() {
        let url = fake_bridge(|mut ws| async move {
            let _hello = next_client_frame(&mut ws).await;
            drop(ws);
        })
        .await;

        let transport = BridgeTransport::new(url, Duration::from_secs(5));
        let mut events = transport.connect(None).await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Closed(CloseReason::Transient(_)))
        ));
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let transport = BridgeTransport::new("ws://127.0.0.1:9", Duration::from_secs(1));
        let err = transport.send_text("628@s.whatsapp.net", "hi").await.unwrap_err();
        assert!(matches!(err, NudgeError::Transport(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let transport = BridgeTransport::new(format!("ws://{addr}"), Duration::from_secs(1));
        assert!(transport.connect(None).await.is_err());
    }
}
