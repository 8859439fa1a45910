//! Server-sent event accumulation for streamed completions.

use super::Completion;
use crate::display::Display;
use crate::error::LlmError;
use serde::Deserialize;

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    /// DeepSeek spelling
    #[serde(default)]
    reasoning_content: Option<String>,
    /// OpenRouter spelling
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}

/// Folds raw SSE bytes into running content and reasoning strings, forwarding
/// each delta to the display in arrival order.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending: Vec<u8>,
    content: String,
    reasoning: String,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one network chunk. Lines may be split across chunks (even inside a
    /// multi-byte character); incomplete tails wait for the next push.
    pub fn push(&mut self, chunk: &[u8], display: Option<&Display>) -> Result<(), LlmError> {
        self.pending.extend_from_slice(chunk);
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            self.handle_line(&line, display)?;
        }
        Ok(())
    }

    /// Flush whatever is left and return the accumulated completion.
    pub fn finish(mut self, display: Option<&Display>) -> Result<Completion, LlmError> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).to_string();
            self.handle_line(&line, display)?;
        }
        Ok(Completion {
            content: self.content,
            reasoning: self.reasoning,
        })
    }

    fn handle_line(&mut self, line: &str, display: Option<&Display>) -> Result<(), LlmError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') || self.done {
            return Ok(());
        }
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let chunk: StreamChunk = serde_json::from_str(data)
            .map_err(|e| LlmError::Parse(format!("bad stream chunk: {}", e)))?;
        if let Some(err) = chunk.error {
            return Err(LlmError::Api {
                status: 200,
                body: err.message,
            });
        }

        for choice in chunk.choices {
            let delta = choice.delta;
            if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
                if !reasoning.is_empty() {
                    self.reasoning.push_str(&reasoning);
                    if let Some(display) = display {
                        display.reasoning(&reasoning);
                    }
                }
            }
            if let Some(content) = delta.content {
                if !content.is_empty() {
                    self.content.push_str(&content);
                    if let Some(display) = display {
                        display.output(&content);
                    }
                }
            }
        }
        Ok(())
    }
}
