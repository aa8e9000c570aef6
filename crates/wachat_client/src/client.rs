//! WebSocket client: backend calls matched to replies by id, push events
//! forwarded to an [`EventHub`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::api::ChatApi;
use crate::error::ClientError;
use crate::events::EventHub;
use crate::messages::{CallMessage, PushEvent, ServerMessage};
use crate::model::{Conversation, Message};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type CallOutcome = Result<Value, String>;
type PendingCalls = Arc<Mutex<Pending>>;

/// Calls awaiting a reply. `closed` is set once the reader has exited.
#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<CallOutcome>>,
}

/// Removes a call's waiter when the call finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().waiters.remove(&self.id);
    }
}

/// Connected WebSocket client.
pub struct Client {
    writer: tokio::sync::Mutex<SplitSink<WsStream, WsMessage>>,
    pending: PendingCalls,
    next_id: AtomicU64,
    events: EventHub,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

/// Connect to the backend at `url` (e.g. `ws://127.0.0.1:8765`).
pub async fn connect(url: &str) -> Result<Client, ClientError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
    let (write, read) = ws_stream.split();
    let pending: PendingCalls = Arc::default();
    let events = EventHub::new();
    let reader = tokio::spawn(read_loop(read, pending.clone(), events.clone()));
    debug!(url, "connected");
    Ok(Client {
        writer: tokio::sync::Mutex::new(write),
        pending,
        next_id: AtomicU64::new(1),
        events,
        request_timeout: DEFAULT_REQUEST_TIMEOUT,
        reader,
    })
}

impl Client {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Push events received on this connection.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Calls sent and not yet answered.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().waiters.len()
    }

    /// Invoke `method` and decode its result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(ClientError::Disconnected);
            }
            pending.waiters.insert(id, tx);
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let frame = serde_json::to_string(&CallMessage::new(id, method, params))?;
        self.writer
            .lock()
            .await
            .send(WsMessage::Text(frame))
            .await?;

        let outcome = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(ClientError::Disconnected),
            Err(_) => {
                return Err(ClientError::Timeout {
                    method: method.to_string(),
                })
            }
        };
        let value = outcome.map_err(|message| ClientError::remote(method, message))?;
        serde_json::from_value(value).map_err(ClientError::from)
    }

    /// Send a close frame; the reader ends and pending calls fail.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.writer.lock().await.close().await?;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
        self.events.close();
    }
}

async fn read_loop(mut read: SplitStream<WsStream>, pending: PendingCalls, events: EventHub) {
    while let Some(item) = read.next().await {
        let text = match item {
            Ok(WsMessage::Text(t)) => t,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                break;
            }
        };
        let value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "skipping non-JSON frame");
                continue;
            }
        };
        match ServerMessage::from_json(&value) {
            Ok(ServerMessage::Result { id, result }) => resolve(&pending, id, Ok(result)),
            Ok(ServerMessage::Error { id, error }) => resolve(&pending, id, Err(error)),
            Ok(ServerMessage::Event { name, data }) => match PushEvent::from_wire(&name, &data) {
                Some(event) => {
                    events.emit(event);
                }
                None => debug!(event = %name, "ignoring event"),
            },
            Err(e) => warn!(error = %e, "skipping malformed frame"),
        }
    }
    debug!("connection closed");
    {
        let mut pending = pending.lock();
        pending.closed = true;
        pending.waiters.clear();
    }
    events.close();
}

fn resolve(pending: &PendingCalls, id: u64, outcome: CallOutcome) {
    match pending.lock().waiters.remove(&id) {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => debug!(id, "reply for unknown call"),
    }
}

#[async_trait]
impl ChatApi for Client {
    async fn create_conversation(&self, title: &str) -> Result<Conversation, ClientError> {
        self.call("CreateConversation", json!([title])).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, ClientError> {
        self.call("GetConversation", json!([id])).await
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        let list: Option<Vec<Conversation>> = self.call("ListConversations", json!([])).await?;
        Ok(list.unwrap_or_default())
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ClientError> {
        self.call("DeleteConversation", json!([id])).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, ClientError> {
        self.call("SendMessage", json!([conversation_id, content]))
            .await
    }

    async fn send_message_stream(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        self.call("SendMessageStream", json!([conversation_id, content]))
            .await
    }

    async fn update_conversation_title(&self, id: &str, title: &str) -> Result<(), ClientError> {
        self.call("UpdateConversationTitle", json!([id, title]))
            .await
    }

    async fn clear_messages(&self, id: &str) -> Result<(), ClientError> {
        self.call("ClearMessages", json!([id])).await
    }
}
