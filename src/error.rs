//! Error taxonomy
//!
//! Stage glue uses `anyhow`; these enums exist where a caller has to branch on
//! what went wrong (a timed-out model call is reported differently from a
//! refused connection, a declined write is not an error at all).

use std::path::PathBuf;

/// Fatal setup problems, reported before any subprocess or network work.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing API key for {provider}: set the {env_var} environment variable")]
    MissingCredential {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("no test command given")]
    MissingTestCommand,

    #[error("failed to read system prompt {}: {source}", path.display())]
    SystemPrompt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {}: {reason}", path.display())]
    Settings { path: PathBuf, reason: String },
}

/// Failures of a single model round-trip.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("model call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("failed to parse model response: {0}")]
    Parse(String),
}

impl LlmError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LlmError::Timeout { .. })
    }
}

/// Subprocess failures from the command runner.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}", code.map(|c| format!("status {}", c)).unwrap_or_else(|| "a signal".to_string()))]
    Exit {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

/// Rejections for untrusted, model-supplied file paths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("absolute paths are not allowed: {0}")]
    Absolute(String),

    #[error("path escapes the working tree: {0}")]
    Escapes(String),

    #[error("refusing to write through a symlink: {0}")]
    Symlink(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinguishable_from_other_failures() {
        let timeout = LlmError::Timeout { secs: 30 };
        assert!(timeout.is_timeout());
        assert!(timeout.to_string().contains("30s"));

        let api = LlmError::Api {
            status: 500,
            body: "boom".to_string(),
        };
        assert!(!api.is_timeout());
    }

    #[test]
    fn exit_error_names_status() {
        let err = RunError::Exit {
            command: "cargo test".to_string(),
            code: Some(101),
            output: "test failed".to_string(),
        };
        assert!(err.to_string().contains("status 101"));
    }
}
