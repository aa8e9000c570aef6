//! The backend's request/response surface.

use async_trait::async_trait;

use crate::error::ClientError;
use crate::model::{Conversation, Message};

/// Calls the synchronizer makes against the chat backend.
///
/// `send_message_stream` resolving only means the backend accepted the
/// message; the reply arrives as push events.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn create_conversation(&self, title: &str) -> Result<Conversation, ClientError>;

    /// Full conversation, transcript included.
    async fn get_conversation(&self, id: &str) -> Result<Conversation, ClientError>;

    /// Summaries; transcripts may be empty.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), ClientError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, ClientError>;

    async fn send_message_stream(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), ClientError>;

    async fn update_conversation_title(&self, id: &str, title: &str) -> Result<(), ClientError>;

    async fn clear_messages(&self, id: &str) -> Result<(), ClientError>;
}
