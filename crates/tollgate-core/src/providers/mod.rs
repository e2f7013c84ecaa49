//! Model provider client.

pub mod openai;
pub mod shared;

pub use openai::{OpenAIChatCompletionsClient, OpenAIChatCompletionsConfig};
pub use shared::{
    ChatContentBlock, ChatMessage, ContentBlockType, MessageContent, ProviderError,
    ProviderErrorKind, ProviderResult, ProviderStream, StreamEvent, Usage, resolve_api_key,
    resolve_base_url,
};
