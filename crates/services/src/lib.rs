//! Services - persistence around the agent dispatchers

pub mod chat_store;

pub use chat_store::{ChatStore, NewChatItem, SaveChat};
