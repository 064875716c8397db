//! Prompt assembly.
//!
//! A prompt is always laid out as system policy, then retrieved context,
//! then the raw user message. Chat-style APIs receive the first two as the
//! system message and the last as the user message.

use serde::Serialize;

use ragline_core::{GenerationRequest, RetrievedContext};

/// A fully assembled prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    /// Rendered context section; `None` for prompts that carry no retrieval.
    pub context: Option<String>,
    pub user: String,
}

/// A chat message for OpenAI-compatible APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl Prompt {
    /// A prompt without a context section (used for classification).
    pub fn bare(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            context: None,
            user: user.into(),
        }
    }

    /// System policy plus context, as one block.
    pub fn system_block(&self) -> String {
        match &self.context {
            Some(context) => format!("{}\n\n{}", self.system.trim_end(), context),
            None => self.system.trim_end().to_string(),
        }
    }

    /// Single-string rendering for completion-style APIs.
    pub fn render(&self) -> String {
        format!("{}\n\nUser question:\n{}", self.system_block(), self.user)
    }

    /// Two-message rendering for chat-style APIs.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system",
                content: self.system_block(),
            },
            ChatMessage {
                role: "user",
                content: self.user.clone(),
            },
        ]
    }
}

/// Builds prompts from generation requests.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    no_context_note: String,
}

impl PromptBuilder {
    pub fn new(no_context_note: impl Into<String>) -> Self {
        Self {
            no_context_note: no_context_note.into(),
        }
    }

    pub fn build(&self, request: &GenerationRequest) -> Prompt {
        Prompt {
            system: request.system_prompt.clone(),
            context: Some(self.render_context(&request.context)),
            user: request.user_message.clone(),
        }
    }

    /// Context passages as numbered, labeled snippets in relevance order.
    pub fn render_context(&self, context: &RetrievedContext) -> String {
        if context.is_empty() {
            return format!("Context:\n{}", self.no_context_note);
        }
        let snippets: Vec<String> = context
            .passages()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "[{}] (source: {}, relevance: {:.2})\n{}",
                    i + 1,
                    p.source_id,
                    p.relevance_score,
                    p.text.trim()
                )
            })
            .collect();
        format!("Context:\n{}", snippets.join("\n\n"))
    }
}
