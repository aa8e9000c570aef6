//! wachat client library: conversation cache, streaming reply assembly and
//! the WebSocket link to the chat backend. Used by the `wachat` CLI.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod messages;
pub mod model;
pub mod sync;

pub use api::ChatApi;
pub use client::{connect, Client};
pub use config::{default_config_path, ChatSection, Config, ConfigError, LogSection, ServerSection};
pub use error::ClientError;
pub use events::{EventHub, Subscription};
pub use messages::{EventKind, PushEvent};
pub use model::{Conversation, Message, Role};
pub use sync::{LogNotifier, Notifier, SendOutcome, SyncOptions, Synchronizer};
