//! Planweave model providers
//!
//! Model catalog, role/pack configuration, token accounting, and a uniform
//! streaming chat-completion client over OpenAI-compatible providers.

pub mod catalog;
pub mod chat;
pub mod client;
pub mod error;
pub mod packs;
pub mod roles;
pub mod token_counter;

pub use catalog::{AvailableModel, ModelCatalog, ModelCompatibility, ModelProvider};
pub use chat::{
    ChatMessage, ChatRequest, Completion, MessageRole, SamplingConfig, StreamChunk,
    ToolDefinition,
};
pub use client::{ChatClient, ChunkStream, HttpChatClient};
pub use error::{ProviderError, ProviderResult};
pub use packs::{ModelPack, ModelRoleConfig, PlannerRoleConfig};
pub use roles::ModelRole;
pub use token_counter::TokenCounter;
