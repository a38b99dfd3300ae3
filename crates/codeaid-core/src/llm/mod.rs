//! Text-generation capability.
//!
//! Callers depend on [`TextGenerator`] only; the backend (OpenAI today) is
//! constructed once at start-up and injected as `Arc<dyn TextGenerator>`.

pub mod fence;
pub mod openai;

use async_trait::async_trait;

use crate::domain::Result;

pub use fence::{extract_json_object, strip_code_fences};
pub use openai::{OpenAiChat, OpenAiConfig};

/// A non-streaming chat backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Backend name for logs (e.g. "openai").
    fn name(&self) -> &'static str;

    /// Send one developer instruction plus one user message; return the reply text.
    ///
    /// The reply may be malformed or wrapped in markdown; callers clean it up.
    async fn chat(&self, developer_instruction: &str, user_content: &str) -> Result<String>;
}
