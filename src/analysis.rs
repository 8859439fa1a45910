//! Analysis stage: diagnose the failing tests from the gathered context.

use crate::config::ModelRole;
use crate::context::RepoContext;
use crate::llm::{ChatModel, Message};
use crate::prompts::{fix_format_instructions, ANALYSIS_SYSTEM};

/// What the prompt builder needs beyond the gathered context.
pub struct AnalysisRequest<'a> {
    pub test_command: &'a str,
    pub system_prompt: Option<&'a str>,
    pub fix: bool,
}

pub fn analysis_messages(request: &AnalysisRequest<'_>, context: &RepoContext) -> Vec<Message> {
    let mut system = request.system_prompt.unwrap_or(ANALYSIS_SYSTEM).to_string();
    if request.fix {
        system.push_str("\n\n");
        system.push_str(&fix_format_instructions());
    }

    let mut user = format!(
        "Test command: {}\n\n## Test output\n\n{}\n\n## Repository\n\n{}\n",
        request.test_command, context.test_output, context.repo_snapshot
    );
    if let Some(diff) = &context.git_diff {
        user.push_str(&format!("\n## Uncommitted changes (git diff)\n\n{}\n", diff));
    }
    if !context.test_files.is_empty() {
        user.push_str("\n## Test files\n");
        for file in &context.test_files {
            user.push_str(&format!("\n### {}\n\n{}\n", file.path, file.content));
        }
    }

    vec![Message::system(system), Message::user(user)]
}

/// Ask the analysis model about the failure; returns its full response text.
pub async fn analyze<M: ChatModel>(
    model: &M,
    request: &AnalysisRequest<'_>,
    context: &RepoContext,
) -> anyhow::Result<String> {
    let messages = analysis_messages(request, context);
    tracing::info!("requesting analysis");
    let completion = match model.complete(ModelRole::Analysis, &messages).await {
        Ok(completion) => completion,
        Err(err) if err.is_timeout() => {
            return Err(anyhow::Error::new(err)
                .context("Analysis model did not answer in time (raise --timeout)"))
        }
        Err(err) => return Err(anyhow::Error::new(err).context("Analysis model call failed")),
    };
    if !completion.reasoning.is_empty() {
        tracing::debug!("analysis reasoning: {} chars", completion.reasoning.len());
    }
    Ok(completion.content)
}
