//! Model client
//!
//! OpenAI-compatible chat completions against the closed set of providers in
//! [`crate::config::Provider`], with optional streaming of reasoning text into
//! the display sink.

mod client;
mod stream;

pub use client::ModelClient;
pub use stream::StreamAccumulator;

use crate::config::ModelRole;
use crate::error::LlmError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One role-tagged conversation message. A fresh list is built per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Full text of one completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub reasoning: String,
}

/// Anything that can answer a chat request for a given stage.
///
/// The analysis and apply stages are generic over this so they can run
/// against a scripted model in tests.
#[allow(async_fn_in_trait)]
pub trait ChatModel {
    async fn complete(&self, role: ModelRole, messages: &[Message]) -> Result<Completion, LlmError>;
}
