//! One batch of fixes, end to end.

use super::apply::{FixApplier, FixResult, FixStatus};
use super::{parse_fix_records, FixRecord};
use crate::llm::ChatModel;
use futures::future::join_all;
use std::collections::HashMap;

/// Aggregate result of applying every record in one analysis response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixRunSummary {
    pub total_files: usize,
    pub files_modified: usize,
    pub declined: usize,
    pub unchanged: usize,
    /// `(file_path, message)` for each per-file failure.
    pub errors: Vec<(String, String)>,
    pub success: bool,
}

/// How a finished run should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixRunOutcome {
    Modified,
    /// The response contained no usable fix records.
    NoFixes,
    /// Records were found but every one was declined or left unchanged.
    NothingApplied,
    Failed,
}

impl FixRunSummary {
    fn from_results(results: &[FixResult], auto_apply: bool) -> Self {
        let mut summary = FixRunSummary {
            total_files: results.len(),
            ..Default::default()
        };
        for result in results {
            match &result.status {
                FixStatus::Applied => summary.files_modified += 1,
                FixStatus::Declined => summary.declined += 1,
                FixStatus::NoChange => summary.unchanged += 1,
                FixStatus::Failed(message) => summary
                    .errors
                    .push((result.file_path.clone(), message.clone())),
            }
        }
        // With auto-apply nothing stands between the model and the disk, so a
        // run that wrote nothing did not do its job.
        summary.success =
            summary.errors.is_empty() && (summary.files_modified > 0 || !auto_apply);
        summary
    }

    pub fn outcome(&self) -> FixRunOutcome {
        if !self.errors.is_empty() && self.files_modified == 0 {
            FixRunOutcome::Failed
        } else if self.files_modified > 0 {
            FixRunOutcome::Modified
        } else if self.total_files == 0 {
            FixRunOutcome::NoFixes
        } else {
            FixRunOutcome::NothingApplied
        }
    }

    /// Human-readable closing line.
    pub fn message(&self) -> String {
        match self.outcome() {
            FixRunOutcome::NoFixes => "No fixes found in the analysis response.".to_string(),
            FixRunOutcome::NothingApplied => format!(
                "No files modified ({} declined, {} unchanged).",
                self.declined, self.unchanged
            ),
            FixRunOutcome::Modified if self.errors.is_empty() => {
                format!("Modified {} of {} files.", self.files_modified, self.total_files)
            }
            FixRunOutcome::Modified => format!(
                "Modified {} of {} files; {} failed.",
                self.files_modified,
                self.total_files,
                self.errors.len()
            ),
            FixRunOutcome::Failed => format!(
                "No files modified; {} of {} failed.",
                self.errors.len(),
                self.total_files
            ),
        }
    }
}

/// Parse `response` and apply every record.
///
/// Different files are applied concurrently and a failure in one never stops
/// the others. Records naming the same file run one after another in the order
/// they were emitted, each reading what the previous one wrote. Confirmation
/// prompts are serialized by the applier's gate.
pub async fn run_fixes<M: ChatModel>(
    response: &str,
    applier: &FixApplier<'_, M>,
) -> FixRunSummary {
    let records = parse_fix_records(response);
    tracing::info!("found {} fix record(s)", records.len());

    let groups = group_by_path(&records);
    let per_file = groups.into_iter().map(|group| async move {
        let mut results = Vec::with_capacity(group.len());
        for (index, record) in group {
            results.push((index, applier.apply(record).await));
        }
        results
    });

    let mut results: Vec<(usize, FixResult)> =
        join_all(per_file).await.into_iter().flatten().collect();
    results.sort_by_key(|(index, _)| *index);
    let results: Vec<FixResult> = results.into_iter().map(|(_, result)| result).collect();

    let summary = FixRunSummary::from_results(&results, applier.auto_apply());
    tracing::debug!(?summary, "fix run finished");
    summary
}

/// Records grouped by target path, groups in first-seen order, each group in
/// emission order. Indices point back into `records`.
fn group_by_path(records: &[FixRecord]) -> Vec<Vec<(usize, &FixRecord)>> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<(usize, &FixRecord)>> = Vec::new();
    for (index, record) in records.iter().enumerate() {
        let slot = *slots.entry(record.file_path.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push((index, record));
    }
    groups
}
