//! In-memory backend and notifier shared by the synchronizer tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use wachat_client::{ChatApi, ClientError, Conversation, Message, Notifier};

#[derive(Default)]
struct State {
    conversations: Vec<Conversation>,
    calls: Vec<String>,
    failing: HashSet<&'static str>,
    next_id: u64,
}

/// Backend holding conversations in a vector. Any method can be made to fail.
#[derive(Default)]
pub struct MemoryApi {
    state: Mutex<State>,
}

impl MemoryApi {
    pub fn with_conversations(conversations: Vec<Conversation>) -> Arc<Self> {
        let api = Self::default();
        api.state.lock().conversations = conversations;
        Arc::new(api)
    }

    pub fn fail(&self, method: &'static str) {
        self.state.lock().failing.insert(method);
    }

    pub fn recover(&self, method: &'static str) {
        self.state.lock().failing.remove(method);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == method).count()
    }

    pub fn stored(&self, id: &str) -> Option<Conversation> {
        self.state
            .lock()
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    fn enter(&self, method: &'static str) -> Result<parking_lot::MutexGuard<'_, State>, ClientError> {
        let mut state = self.state.lock();
        state.calls.push(method.to_string());
        if state.failing.contains(method) {
            return Err(ClientError::remote(method, "backend unavailable"));
        }
        Ok(state)
    }
}

fn not_found(method: &str, id: &str) -> ClientError {
    ClientError::remote(method, format!("conversation {id} not found"))
}

#[async_trait]
impl ChatApi for MemoryApi {
    async fn create_conversation(&self, title: &str) -> Result<Conversation, ClientError> {
        let mut state = self.enter("CreateConversation")?;
        state.next_id += 1;
        let conversation = Conversation::new(format!("conv_{}", state.next_id), title);
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, ClientError> {
        let state = self.enter("GetConversation")?;
        state
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| not_found("GetConversation", id))
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        let state = self.enter("ListConversations")?;
        Ok(state
            .conversations
            .iter()
            .map(|c| Conversation {
                messages: Vec::new(),
                ..c.clone()
            })
            .collect())
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ClientError> {
        let mut state = self.enter("DeleteConversation")?;
        state.conversations.retain(|c| c.id != id);
        Ok(())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, ClientError> {
        let mut state = self.enter("SendMessage")?;
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| not_found("SendMessage", conversation_id))?;
        let reply = Message::assistant(format!("echo: {content}"));
        conversation.push(Message::user(content));
        conversation.push(reply.clone());
        Ok(reply)
    }

    async fn send_message_stream(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.enter("SendMessageStream")?;
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| not_found("SendMessageStream", conversation_id))?;
        conversation.push(Message::user(content));
        Ok(())
    }

    async fn update_conversation_title(&self, id: &str, title: &str) -> Result<(), ClientError> {
        let mut state = self.enter("UpdateConversationTitle")?;
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found("UpdateConversationTitle", id))?;
        conversation.title = title.to_string();
        Ok(())
    }

    async fn clear_messages(&self, id: &str) -> Result<(), ClientError> {
        let mut state = self.enter("ClearMessages")?;
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found("ClearMessages", id))?;
        conversation.messages.clear();
        Ok(())
    }
}

/// Collects every alert the synchronizer raises.
#[derive(Clone, Default)]
pub struct RecordingNotifier(Arc<Mutex<Vec<String>>>);

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn alert(&self, message: &str) {
        self.0.lock().push(message.to_string());
    }
}

pub fn conversation(id: &str, title: &str, messages: Vec<Message>) -> Conversation {
    Conversation {
        messages,
        ..Conversation::new(id, title)
    }
}
