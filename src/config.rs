use crate::judge::JudgeMode;
use crate::models::{Locale, Split, Task};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for one `each` run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Model to evaluate (name, stable id or release id)
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_locale")]
    pub locale: Locale,
    #[serde(default = "default_task")]
    pub task: Task,
    /// Prompt template name; also the first segment of the output path
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// `latest` or `YYYY-MM-DD`
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
    /// Subjects to run; empty means all
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default = "default_splits")]
    pub splits: Vec<Split>,
    /// Attempts per model call
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Per-attempt bound in seconds; 0 disables it
    #[serde(default = "default_timeout")]
    pub timeout_secs: i64,
    /// Recompute units whose artifacts already exist
    #[serde(default)]
    pub override_existing: bool,
    /// Add a per-difficulty breakdown to result.json
    #[serde(default)]
    pub calculate_difficulty: bool,
    /// Write output.json every N samples while a unit is running
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
    /// Rate limit for API requests per second; 0 disables pacing
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
    /// Temperature for response generation
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Maximum tokens for response generation
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Secondary LLM judge
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JudgeConfig {
    #[serde(default)]
    pub mode: JudgeMode,
    #[serde(default = "default_judge_model")]
    pub model: String,
    #[serde(default = "default_judge_prompt")]
    pub prompt: String,
}

/// Hosted OpenAI-compatible endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostedProviderConfig {
    pub api_base: String,
    /// Environment variable name containing the API key
    pub env_var_api_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_openai")]
    pub openai: HostedProviderConfig,
    #[serde(default = "default_anthropic")]
    pub anthropic: HostedProviderConfig,
    #[serde(default = "default_google")]
    pub google: HostedProviderConfig,
    #[serde(default = "default_ollama_endpoint")]
    pub ollama_endpoint: String,
    /// Session cookie for a gated Ollama proxy
    #[serde(default)]
    pub ollama_cookie: Option<String>,
    /// Cookie name used when `ollama_cookie` is a bare value
    #[serde(default)]
    pub ollama_cookie_key: Option<String>,
    #[serde(default = "default_vllm_endpoint")]
    pub vllm_endpoint: String,
    #[serde(default = "default_vllm_api_key_env")]
    pub vllm_env_var_api_key: String,
    /// Remote runnable endpoint; when set every model is served through it
    #[serde(default)]
    pub langserve_endpoint: Option<String>,
}

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default = "default_prompt_path")]
    pub prompt_path: PathBuf,
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_readme_path")]
    pub readme_path: PathBuf,
    #[serde(default = "default_run")]
    pub run: RunConfig,
    #[serde(default = "default_judge")]
    pub judge: JudgeConfig,
    #[serde(default = "default_providers")]
    pub providers: ProvidersConfig,
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_locale() -> Locale {
    Locale::En
}

fn default_task() -> Task {
    Task::Mcqa
}

fn default_prompt() -> String {
    "mcqa".to_string()
}

fn default_prompt_version() -> String {
    "latest".to_string()
}

fn default_splits() -> Vec<Split> {
    vec![Split::Dev, Split::Test, Split::Val]
}

fn default_retries() -> u32 {
    3
}

fn default_timeout() -> i64 {
    30
}

fn default_flush_every() -> usize {
    25
}

fn default_rate_limit() -> f64 {
    10.0
}

/// Slowest accepted request rate; anything lower is a typo, not a budget
pub const MIN_RATE_LIMIT_RPS: f64 = 0.001;

fn default_judge_model() -> String {
    "gpt-4.1".to_string()
}

fn default_judge_prompt() -> String {
    "check-label".to_string()
}

fn default_openai() -> HostedProviderConfig {
    HostedProviderConfig {
        api_base: "https://api.openai.com/v1".to_string(),
        env_var_api_key: "OPENAI_API_KEY".to_string(),
    }
}

fn default_anthropic() -> HostedProviderConfig {
    HostedProviderConfig {
        api_base: "https://api.anthropic.com/v1".to_string(),
        env_var_api_key: "ANTHROPIC_API_KEY".to_string(),
    }
}

fn default_google() -> HostedProviderConfig {
    HostedProviderConfig {
        api_base: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
        env_var_api_key: "GOOGLE_API_KEY".to_string(),
    }
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_vllm_endpoint() -> String {
    "http://localhost:8000".to_string()
}

fn default_vllm_api_key_env() -> String {
    "VLLM_API_KEY".to_string()
}

fn default_output_path() -> PathBuf {
    PathBuf::from("output")
}

fn default_prompt_path() -> PathBuf {
    PathBuf::from("prompts")
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("data/KoCEM")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_readme_path() -> PathBuf {
    PathBuf::from("README.md")
}

fn default_run() -> RunConfig {
    RunConfig {
        model: default_model(),
        locale: default_locale(),
        task: default_task(),
        prompt: default_prompt(),
        prompt_version: default_prompt_version(),
        subjects: Vec::new(),
        splits: default_splits(),
        retries: default_retries(),
        timeout_secs: default_timeout(),
        override_existing: false,
        calculate_difficulty: false,
        flush_every: default_flush_every(),
        rate_limit_rps: default_rate_limit(),
        temperature: None,
        max_tokens: None,
    }
}

fn default_judge() -> JudgeConfig {
    JudgeConfig {
        mode: JudgeMode::default(),
        model: default_judge_model(),
        prompt: default_judge_prompt(),
    }
}

fn default_providers() -> ProvidersConfig {
    ProvidersConfig {
        openai: default_openai(),
        anthropic: default_anthropic(),
        google: default_google(),
        ollama_endpoint: default_ollama_endpoint(),
        ollama_cookie: None,
        ollama_cookie_key: None,
        vllm_endpoint: default_vllm_endpoint(),
        vllm_env_var_api_key: default_vllm_api_key_env(),
        langserve_endpoint: None,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            prompt_path: default_prompt_path(),
            dataset_path: default_dataset_path(),
            log_dir: default_log_dir(),
            readme_path: default_readme_path(),
            run: default_run(),
            judge: default_judge(),
            providers: default_providers(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Reject values the runner cannot act on
    pub fn validate(&self) -> Result<()> {
        let rps = self.run.rate_limit_rps;
        if !rps.is_finite() || (rps != 0.0 && rps < MIN_RATE_LIMIT_RPS) {
            bail!(
                "rate_limit_rps must be 0 (unlimited) or at least {}, got {}",
                MIN_RATE_LIMIT_RPS,
                rps
            );
        }
        Ok(())
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Environment variables win over file values
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("OUTPUT_PATH") {
            self.output_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("PROMPT_PATH") {
            self.prompt_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("DS_PATH") {
            self.dataset_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("OLLAMA_ENDPOINT") {
            self.providers.ollama_endpoint = v;
        }
        if let Some(v) = non_empty("OLLAMA_COOKIE") {
            self.providers.ollama_cookie = Some(v);
        }
        if let Some(v) = non_empty("VLLM_ENDPOINT") {
            self.providers.vllm_endpoint = v;
        }
        if let Some(v) = non_empty("LANGSERVE_ENDPOINT") {
            self.providers.langserve_endpoint = Some(v);
        }
    }
}
