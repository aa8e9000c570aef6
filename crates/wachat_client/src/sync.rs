//! Client-side conversation cache kept in step with the chat backend.
//!
//! Two inputs feed the [`Synchronizer`]: request/response calls it makes
//! itself (list, create, select, send) and push events the backend emits
//! while it streams a reply (`stream:start`, `stream:response*`, then
//! `stream:end` or `stream:error`, plus `conversation:title-updated`).
//!
//! One reply may be in flight at a time across all conversations. While it
//! is, `is_sending()` is true, further sends are rejected and the partial
//! reply accumulates in `streaming_message()`. The buffer is a preview
//! only; the transcript receives the message carried by `stream:end`.
//!
//! A stream that never terminates would block sending forever, so each
//! accepted send carries a deadline. [`Synchronizer::drive`] waits for the
//! next event or that deadline, whichever comes first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::ChatApi;
use crate::config::{Config, DEFAULT_STREAM_TIMEOUT_SECS, DEFAULT_TITLE_PREFIX};
use crate::events::Subscription;
use crate::messages::PushEvent;
use crate::model::{Conversation, Message};

/// Where user-facing failures go (the desktop app shows a blocking alert).
pub trait Notifier: Send {
    fn alert(&self, message: &str);
}

/// Reports failures through `tracing` only.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, message: &str) {
        tracing::error!(%message, "chat failure");
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How long a reply may take, from send to `stream:end`.
    pub stream_timeout: Duration,
    /// New conversations are titled `"<prefix> <month>/<day>"`.
    pub title_prefix: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            stream_timeout: Duration::from_secs(DEFAULT_STREAM_TIMEOUT_SECS),
            title_prefix: DEFAULT_TITLE_PREFIX.to_string(),
        }
    }
}

impl From<&Config> for SyncOptions {
    fn from(config: &Config) -> Self {
        Self {
            stream_timeout: config.stream_timeout(),
            title_prefix: config.title_prefix().to_string(),
        }
    }
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Empty text, no active conversation, or a send already in flight.
    /// Nothing changed.
    Rejected,
    /// The user message was appended but the backend call failed.
    Failed,
    /// The backend accepted the message.
    Sent,
}

#[derive(Debug)]
struct ActiveStream {
    conversation_id: String,
    buffer: String,
    /// `None` when the timeout is too large to represent.
    deadline: Option<Instant>,
}

pub struct Synchronizer {
    api: Arc<dyn ChatApi>,
    notifier: Box<dyn Notifier>,
    options: SyncOptions,
    conversations: Vec<Conversation>,
    active_id: Option<String>,
    /// Ids whose full transcript has been fetched.
    loaded: HashSet<String>,
    stream: Option<ActiveStream>,
}

impl Synchronizer {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self {
            api,
            notifier: Box::new(LogNotifier),
            options: SyncOptions::default(),
            conversations: Vec::new(),
            active_id: None,
            loaded: HashSet::new(),
            stream: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn active_conversation_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.conversation(self.active_id.as_deref()?)
    }

    pub fn current_messages(&self) -> &[Message] {
        self.current_conversation()
            .map(|c| c.messages.as_slice())
            .unwrap_or_default()
    }

    /// Partial assistant reply; empty when nothing is streaming.
    pub fn streaming_message(&self) -> &str {
        self.stream.as_ref().map_or("", |s| s.buffer.as_str())
    }

    pub fn is_sending(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream_deadline(&self) -> Option<Instant> {
        self.stream.as_ref().and_then(|s| s.deadline)
    }

    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    /// Replace the collection with the backend's list. Transcripts already
    /// loaded survive for conversations that are still listed.
    pub async fn load_conversations(&mut self) -> bool {
        let list = match self.api.list_conversations().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "failed to load conversations");
                return false;
            }
        };

        let mut previous: HashMap<String, Conversation> = self
            .conversations
            .drain(..)
            .map(|c| (c.id.clone(), c))
            .collect();
        let loaded = &self.loaded;
        let merged: Vec<Conversation> = list
            .into_iter()
            .map(|mut summary| {
                if loaded.contains(&summary.id) {
                    if let Some(old) = previous.remove(&summary.id) {
                        summary.messages = old.messages;
                    }
                }
                summary
            })
            .collect();
        self.conversations = merged;

        let conversations = &self.conversations;
        self.loaded
            .retain(|id| conversations.iter().any(|c| &c.id == id));
        let active_gone = self
            .active_id
            .as_deref()
            .is_some_and(|id| self.conversation(id).is_none());
        if active_gone {
            debug!(conversation_id = ?self.active_id, "active conversation no longer listed");
            self.active_id = None;
        }
        debug!(count = self.conversations.len(), "conversations loaded");
        true
    }

    /// Create a conversation on the backend, put it first and make it active.
    pub async fn create_new_conversation(&mut self) -> Option<String> {
        let today = Local::now();
        let title = format!(
            "{} {}/{}",
            self.options.title_prefix,
            today.month(),
            today.day()
        );
        let conversation = match self.api.create_conversation(&title).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to create conversation");
                return None;
            }
        };
        let id = conversation.id.clone();
        info!(conversation_id = %id, %title, "conversation created");
        self.loaded.insert(id.clone());
        self.conversations.insert(0, conversation);
        self.active_id = Some(id.clone());
        Some(id)
    }

    /// Make `id` active, fetching its transcript on first selection.
    ///
    /// A known entry is updated in place. An unknown id is fetched and
    /// inserted first; if that fetch fails the selection does not happen.
    pub async fn select_conversation(&mut self, id: &str) -> bool {
        if self.conversation(id).is_some() {
            self.active_id = Some(id.to_string());
            if self.loaded.contains(id) {
                return true;
            }
            match self.api.get_conversation(id).await {
                Ok(full) => {
                    if let Some(existing) = self.conversation_mut(id) {
                        existing.messages = full.messages;
                        existing.updated_at = full.updated_at;
                        self.loaded.insert(id.to_string());
                    }
                }
                Err(e) => {
                    warn!(conversation_id = id, error = %e, "failed to load conversation messages")
                }
            }
            return true;
        }

        match self.api.get_conversation(id).await {
            Ok(full) => {
                self.loaded.insert(full.id.clone());
                self.active_id = Some(full.id.clone());
                self.conversations.insert(0, full);
                true
            }
            Err(e) => {
                warn!(conversation_id = id, error = %e, "failed to load conversation");
                false
            }
        }
    }

    /// Check the send preconditions and append the optimistic user message.
    fn begin_send(&mut self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            debug!("ignoring empty message");
            return None;
        }
        if self.stream.is_some() {
            debug!("send already in progress");
            return None;
        }
        let conversation_id = self.active_id.clone()?;
        self.conversation_mut(&conversation_id)?
            .push(Message::user(text));
        self.stream = Some(ActiveStream {
            conversation_id: conversation_id.clone(),
            buffer: String::new(),
            deadline: Instant::now().checked_add(self.options.stream_timeout),
        });
        Some(conversation_id)
    }

    /// Send `text` to the active conversation and let the reply stream in.
    pub async fn send_message(&mut self, text: &str) -> SendOutcome {
        let Some(conversation_id) = self.begin_send(text) else {
            return SendOutcome::Rejected;
        };
        match self.api.send_message_stream(&conversation_id, text).await {
            Ok(()) => {
                debug!(conversation_id = %conversation_id, "message accepted");
                SendOutcome::Sent
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "failed to send message");
                self.stream = None;
                SendOutcome::Failed
            }
        }
    }

    /// Non-streaming variant: the reply comes back as the call result.
    pub async fn send_message_sync(&mut self, text: &str) -> SendOutcome {
        let Some(conversation_id) = self.begin_send(text) else {
            return SendOutcome::Rejected;
        };
        let result = self.api.send_message(&conversation_id, text).await;
        self.stream = None;
        match result {
            Ok(reply) => {
                if let Some(conversation) = self.conversation_mut(&conversation_id) {
                    conversation.push(reply.ensure_id());
                }
                SendOutcome::Sent
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "failed to send message");
                SendOutcome::Failed
            }
        }
    }

    /// Apply one push event.
    pub fn handle_event(&mut self, event: PushEvent) {
        match event {
            PushEvent::StreamStart { .. } => match self.stream.as_mut() {
                Some(stream) => stream.buffer.clear(),
                None => debug!("stream:start with no send in flight"),
            },
            PushEvent::StreamResponse { chunk, .. } => match (self.stream.as_mut(), chunk) {
                (Some(stream), Some(chunk)) => stream.buffer.push_str(&chunk),
                (None, Some(_)) => debug!("dropping chunk with no send in flight"),
                (_, None) => debug!("stream:response without chunk"),
            },
            PushEvent::StreamEnd {
                conversation_id,
                message,
            } => self.finish_stream(conversation_id, message),
            PushEvent::StreamError { error, .. } => {
                let error = error.unwrap_or_else(|| "unknown error".to_string());
                warn!(%error, "stream failed");
                self.stream = None;
                self.notifier
                    .alert(&format!("Failed to send message: {error}"));
            }
            PushEvent::TitleUpdated {
                conversation_id,
                title,
            } => match self.conversation_mut(&conversation_id) {
                Some(conversation) => conversation.title = title,
                None => debug!(conversation_id = %conversation_id, "title update for unknown conversation"),
            },
        }
    }

    fn finish_stream(&mut self, conversation_id: Option<String>, message: Option<Message>) {
        let stream = self.stream.take();
        let Some(message) = message else {
            debug!("stream:end without message");
            return;
        };
        let target = conversation_id
            .or_else(|| stream.map(|s| s.conversation_id))
            .or_else(|| self.active_id.clone());
        match target.as_deref().and_then(|id| self.conversation_mut(id)) {
            Some(conversation) => conversation.push(message.ensure_id()),
            None => debug!(conversation_id = ?target, "reply for unknown conversation dropped"),
        }
    }

    /// Abandon the in-flight stream if its deadline has passed.
    pub fn expire_stream(&mut self) -> bool {
        let expired = self
            .stream
            .as_ref()
            .and_then(|s| s.deadline)
            .is_some_and(|deadline| Instant::now() >= deadline);
        if !expired {
            return false;
        }
        self.stream = None;
        let secs = self.options.stream_timeout.as_secs();
        warn!(timeout_secs = secs, "stream timed out");
        self.notifier
            .alert(&format!("Failed to send message: no reply within {secs}s"));
        true
    }

    /// Stop waiting for the in-flight reply. Later events for it are
    /// handled like any other.
    pub fn cancel_stream(&mut self) -> bool {
        match self.stream.take() {
            Some(stream) => {
                info!(conversation_id = %stream.conversation_id, "stream cancelled");
                true
            }
            None => false,
        }
    }

    /// Wait for the next push event or the stream deadline and apply it.
    /// Queued events are applied before the deadline is checked.
    /// Returns false once the subscription has closed.
    pub async fn drive(&mut self, events: &mut Subscription) -> bool {
        let deadline = self.stream_deadline();
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => {
                    self.handle_event(event);
                    true
                }
                None => false,
            },
            _ = deadline_elapsed(deadline) => {
                self.expire_stream();
                true
            }
        }
    }

    pub async fn delete_conversation(&mut self, id: &str) -> bool {
        if let Err(e) = self.api.delete_conversation(id).await {
            warn!(conversation_id = id, error = %e, "failed to delete conversation");
            return false;
        }
        self.conversations.retain(|c| c.id != id);
        self.loaded.remove(id);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
        }
        if self
            .stream
            .as_ref()
            .is_some_and(|s| s.conversation_id == id)
        {
            self.stream = None;
        }
        true
    }

    pub async fn rename_conversation(&mut self, id: &str, title: &str) -> bool {
        if let Err(e) = self.api.update_conversation_title(id, title).await {
            warn!(conversation_id = id, error = %e, "failed to rename conversation");
            return false;
        }
        if let Some(conversation) = self.conversation_mut(id) {
            conversation.title = title.to_string();
        }
        true
    }

    pub async fn clear_messages(&mut self, id: &str) -> bool {
        if let Err(e) = self.api.clear_messages(id).await {
            warn!(conversation_id = id, error = %e, "failed to clear messages");
            return false;
        }
        if let Some(conversation) = self.conversation_mut(id) {
            conversation.messages.clear();
        }
        true
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
