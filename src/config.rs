//! Configuration for a mender run
//!
//! Values come from three places, highest precedence first: command-line flags,
//! the optional settings file at `<config_dir>/mender/config.json`, and built-in
//! defaults. API keys only ever come from the environment.

use crate::error::ConfigError;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SERIALIZE_COMMAND: &str = "repomix --stdout";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "mender",
    about = "Run a test command, have a model diagnose the failure, optionally apply its fix",
    version
)]
pub struct Args {
    /// Ask the model for file patches and apply them
    #[arg(long)]
    pub fix: bool,

    /// Write patches without asking for confirmation (implies --fix)
    #[arg(long)]
    pub auto_apply: bool,

    /// Verbose logging; implies --no-ui (RUST_LOG overrides)
    #[arg(long)]
    pub debug: bool,

    /// Command that prints a serialized copy of the repository
    #[arg(long, value_name = "CMD")]
    pub serialize_command: Option<String>,

    /// Replace the analysis system prompt with the contents of this file
    #[arg(long, value_name = "FILE")]
    pub system_prompt: Option<PathBuf>,

    /// Do not open the live terminal view
    #[arg(long)]
    pub no_ui: bool,

    /// Do not stream the analysis response
    #[arg(long)]
    pub no_stream: bool,

    /// Seconds to wait for each model response
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Glob for test or source files to include in the analysis prompt (repeatable)
    #[arg(long = "test-glob", value_name = "PATTERN")]
    pub test_globs: Vec<String>,

    /// Provider used for the analysis call
    #[arg(long, value_enum, default_value_t = Provider::DeepSeek)]
    pub analysis_provider: Provider,

    /// Provider used for the per-file apply calls
    #[arg(long, value_enum, default_value_t = Provider::OpenRouter)]
    pub apply_provider: Provider,

    /// Rerun tests and repeat analysis/fix up to this many times
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub max_iterations: u32,

    /// Test command followed by its arguments
    #[arg(
        value_name = "TEST_COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true
    )]
    pub test_command: Vec<String>,
}

/// Hosted model providers mender knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    #[value(name = "deepseek")]
    DeepSeek,
    #[value(name = "openrouter")]
    OpenRouter,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "DeepSeek",
            Provider::OpenRouter => "OpenRouter",
        }
    }

    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    pub fn default_url(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "https://api.deepseek.com/chat/completions",
            Provider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek-reasoner",
            Provider::OpenRouter => "anthropic/claude-sonnet-4.5",
        }
    }

    pub fn temperature(&self) -> f32 {
        0.0
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            Provider::DeepSeek => 8192,
            Provider::OpenRouter => 16384,
        }
    }
}

/// Which stage a model call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Analysis,
    Apply,
}

/// Everything needed to address one provider/model pair.
#[derive(Debug, Clone)]
pub struct Profile {
    pub provider: Provider,
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key: String,
}

/// Optional on-disk overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub analysis_model: Option<String>,
    pub apply_model: Option<String>,
    pub deepseek_url: Option<String>,
    pub openrouter_url: Option<String>,
    pub serialize_command: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Settings {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mender").join("config.json"))
    }

    /// Load settings from the user config dir; missing file means defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(err) => {
                preserve_corrupt_settings(path, &content);
                tracing::warn!(
                    "{}; a backup was saved and defaults were loaded",
                    ConfigError::Settings {
                        path: path.to_path_buf(),
                        reason: err.to_string(),
                    }
                );
                Self::default()
            }
        }
    }

    fn url_for(&self, provider: Provider) -> String {
        let configured = match provider {
            Provider::DeepSeek => self.deepseek_url.as_deref(),
            Provider::OpenRouter => self.openrouter_url.as_deref(),
        };
        configured
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(provider.default_url())
            .to_string()
    }
}

fn preserve_corrupt_settings(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

/// Resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub test_command: Vec<String>,
    pub fix: bool,
    pub auto_apply: bool,
    pub serialize_command: String,
    pub system_prompt: Option<String>,
    pub stream: bool,
    pub timeout: Duration,
    pub test_globs: Vec<String>,
    pub max_iterations: u32,
    pub analysis: Profile,
    pub apply: Option<Profile>,
    pub work_dir: PathBuf,
}

impl Config {
    /// Build the run configuration. `env` looks up environment variables so
    /// credential checks can be exercised without touching the process env.
    pub fn resolve(
        args: Args,
        settings: &Settings,
        work_dir: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if args.test_command.is_empty() || args.test_command[0].trim().is_empty() {
            return Err(ConfigError::MissingTestCommand);
        }

        let fix = args.fix || args.auto_apply;

        let analysis = profile_for(
            args.analysis_provider,
            settings.analysis_model.as_deref(),
            settings,
            &env,
        )?;
        let apply = if fix {
            Some(profile_for(
                args.apply_provider,
                settings.apply_model.as_deref(),
                settings,
                &env,
            )?)
        } else {
            None
        };

        let system_prompt = match args.system_prompt {
            Some(path) => Some(
                fs::read_to_string(&path)
                    .map_err(|source| ConfigError::SystemPrompt { path, source })?,
            ),
            None => None,
        };

        let timeout_secs = args
            .timeout
            .or(settings.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .max(1);

        Ok(Self {
            test_command: args.test_command,
            fix,
            auto_apply: args.auto_apply,
            serialize_command: args
                .serialize_command
                .or_else(|| settings.serialize_command.clone())
                .unwrap_or_else(|| DEFAULT_SERIALIZE_COMMAND.to_string()),
            system_prompt,
            stream: !args.no_stream,
            timeout: Duration::from_secs(timeout_secs),
            test_globs: args.test_globs,
            max_iterations: args.max_iterations.max(1),
            analysis,
            apply,
            work_dir,
        })
    }

    /// The test command as typed, for logs and prompts.
    pub fn test_command_line(&self) -> String {
        self.test_command.join(" ")
    }
}

fn profile_for(
    provider: Provider,
    model_override: Option<&str>,
    settings: &Settings,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Profile, ConfigError> {
    let api_key = env(provider.env_var())
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or(ConfigError::MissingCredential {
            provider: provider.name(),
            env_var: provider.env_var(),
        })?;

    Ok(Profile {
        provider,
        url: settings.url_for(provider),
        model: model_override
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(provider.default_model())
            .to_string(),
        temperature: provider.temperature(),
        max_tokens: provider.max_tokens(),
        api_key,
    })
}
