//! Per-file fix application
//!
//! A fix record describes a change; it is not necessarily the whole file. The
//! apply model merges it into the current content, we pull the merged file out
//! of its reply, and (after confirmation, unless auto-applying) write it back.

use super::confirm::ConfirmationGate;
use super::{extract_updated_code, FixRecord, ORIGINAL_FILE_CLOSE, ORIGINAL_FILE_OPEN};
use crate::config::ModelRole;
use crate::display::Display;
use crate::llm::{ChatModel, Message};
use crate::prompts::{apply_instructions, apply_system};
use crate::util::{ensure_trailing_newline, resolve_repo_path_allow_new};
use anyhow::Context;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixStatus {
    /// Written to disk.
    Applied,
    /// The model produced nothing usable, or nothing different.
    NoChange,
    /// The operator said no.
    Declined,
    /// Read, write, path or model failure for this file only.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixResult {
    pub file_path: String,
    pub status: FixStatus,
}

impl FixResult {
    pub fn applied(&self) -> bool {
        self.status == FixStatus::Applied
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            FixStatus::Failed(message) => Some(message),
            _ => None,
        }
    }
}

pub struct FixApplier<'a, M> {
    model: &'a M,
    root: &'a Path,
    auto_apply: bool,
    gate: &'a ConfirmationGate,
    display: &'a Display,
}

impl<'a, M: ChatModel> FixApplier<'a, M> {
    pub fn new(
        model: &'a M,
        root: &'a Path,
        auto_apply: bool,
        gate: &'a ConfirmationGate,
        display: &'a Display,
    ) -> Self {
        Self {
            model,
            root,
            auto_apply,
            gate,
            display,
        }
    }

    pub fn auto_apply(&self) -> bool {
        self.auto_apply
    }

    /// Apply one record. Never fails as a whole; failures land in the result.
    pub async fn apply(&self, record: &FixRecord) -> FixResult {
        let path = record.file_path.as_str();
        self.display.line(&format!("  Merging patch into {}...", path));

        let status = match self.try_apply(record).await {
            Ok(status) => status,
            Err(err) => FixStatus::Failed(format!("{:#}", err)),
        };

        match &status {
            FixStatus::Applied => self.display.line(&format!("  + {}: applied", path)),
            FixStatus::NoChange => self.display.line(&format!("  · {}: no change", path)),
            FixStatus::Declined => self.display.line(&format!("  · {}: skipped", path)),
            FixStatus::Failed(message) => {
                tracing::warn!("fix for {} failed: {}", path, message);
                self.display.line(&format!("  ! {}: {}", path, message));
            }
        }

        FixResult {
            file_path: record.file_path.clone(),
            status,
        }
    }

    async fn try_apply(&self, record: &FixRecord) -> anyhow::Result<FixStatus> {
        let target = resolve_repo_path_allow_new(self.root, Path::new(&record.file_path))?;

        if !tokio::fs::try_exists(&target.absolute).await.unwrap_or(false) {
            if let Some(parent) = target.absolute.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            tokio::fs::write(&target.absolute, "")
                .await
                .with_context(|| format!("Failed to create {}", record.file_path))?;
            tracing::debug!("created empty {}", target.relative.display());
        }

        let original = tokio::fs::read_to_string(&target.absolute)
            .await
            .with_context(|| format!("Failed to read {}", record.file_path))?;

        let messages = apply_messages(&record.file_path, &original, &record.patch_body);
        let completion = self
            .model
            .complete(ModelRole::Apply, &messages)
            .await
            .context("Apply model call failed")?;

        let Some(proposed) = extract_updated_code(&completion.content) else {
            tracing::debug!("no updated code in reply for {}", record.file_path);
            return Ok(FixStatus::NoChange);
        };
        let content = ensure_trailing_newline(&proposed);
        if proposed == original || content == original {
            return Ok(FixStatus::NoChange);
        }

        if !self.auto_apply {
            let accepted = self
                .gate
                .confirm(&record.file_path, &original, &content)
                .await
                .context("Failed to read confirmation")?;
            if !accepted {
                return Ok(FixStatus::Declined);
            }
        }

        write_atomic(&target.absolute, &content)
            .await
            .with_context(|| format!("Failed to write {}", record.file_path))?;
        Ok(FixStatus::Applied)
    }
}

/// System + user messages for the merge round-trip.
pub fn apply_messages(file_path: &str, original: &str, patch_body: &str) -> Vec<Message> {
    let user = format!(
        "File: {}\n\n{}\n{}\n{}\n\nPatch:\n{}\n\n{}",
        file_path,
        ORIGINAL_FILE_OPEN,
        original,
        ORIGINAL_FILE_CLOSE,
        patch_body,
        apply_instructions()
    );
    vec![Message::system(apply_system()), Message::user(user)]
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write via a sibling temp file and rename, keeping the target's permissions.
async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let unique = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = path.with_file_name(format!(
        ".{}.{}-{}.mender-tmp",
        file_name,
        std::process::id(),
        unique
    ));

    tokio::fs::write(&tmp_path, content).await?;
    if let Ok(metadata) = tokio::fs::metadata(path).await {
        let _ = tokio::fs::set_permissions(&tmp_path, metadata.permissions()).await;
    }
    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    Ok(())
}
