use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub structuring: StructuringConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub ranker: RankerConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_max_tokens() -> u32 {
    1024
}
fn default_llm_timeout() -> u64 {
    45
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// Vision model fallback chain, tried in order.
    #[serde(default = "default_ocr_models")]
    pub models: Vec<String>,
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            models: default_ocr_models(),
            min_text_len: default_min_text_len(),
            timeout_secs: default_ocr_timeout(),
        }
    }
}

fn default_ocr_models() -> Vec<String> {
    vec![
        "meta-llama/llama-3.2-11b-vision-instruct:free".to_string(),
        "qwen/qwen-2.5-vl-7b-instruct:free".to_string(),
        "google/gemini-flash-1.5".to_string(),
        "openai/gpt-4o-mini".to_string(),
        "anthropic/claude-3-haiku".to_string(),
        "anthropic/claude-3.5-sonnet".to_string(),
    ]
}
fn default_min_text_len() -> usize {
    20
}
fn default_ocr_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct StructuringConfig {
    #[serde(default = "default_structuring_model")]
    pub model: String,
    #[serde(default = "default_structuring_timeout")]
    pub timeout_secs: u64,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            model: default_structuring_model(),
            timeout_secs: default_structuring_timeout(),
        }
    }
}

fn default_structuring_model() -> String {
    "openai/gpt-4o-mini".to_string()
}
fn default_structuring_timeout() -> u64 {
    90
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    /// Cosine similarity at or above which an existing canonical menu is
    /// reused instead of creating a new one.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.90
}

#[derive(Debug, Deserialize, Clone)]
pub struct RankerConfig {
    /// Rule scores at or below this skip the LLM refinement call.
    #[serde(default = "default_skip_below")]
    pub skip_below: f32,
    /// Rule scores at or above this skip the LLM refinement call.
    #[serde(default = "default_skip_above")]
    pub skip_above: f32,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            skip_below: default_skip_below(),
            skip_above: default_skip_above(),
        }
    }
}

fn default_skip_below() -> f32 {
    20.0
}
fn default_skip_above() -> f32 {
    90.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    #[serde(default)]
    pub weekly_price_id: Option<String>,
    #[serde(default)]
    pub annual_price_id: Option<String>,
    #[serde(default = "default_success_url")]
    pub checkout_success_url: String,
    #[serde(default = "default_cancel_url")]
    pub checkout_cancel_url: String,
    /// Maximum age of a webhook signature timestamp before it is rejected.
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_secs: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            weekly_price_id: None,
            annual_price_id: None,
            checkout_success_url: default_success_url(),
            checkout_cancel_url: default_cancel_url(),
            signature_tolerance_secs: default_tolerance(),
        }
    }
}

fn default_success_url() -> String {
    "https://nutriflow.app/payment-success".to_string()
}
fn default_cancel_url() -> String {
    "https://nutriflow.app/choose-plan".to_string()
}
fn default_tolerance() -> i64 {
    300
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.llm.provider.as_str() {
        "openai" | "anthropic" | "openrouter" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be openai, anthropic, or openrouter.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    if !(0.0..=1.0).contains(&config.dedup.similarity_threshold)
        || config.dedup.similarity_threshold == 0.0
    {
        anyhow::bail!("dedup.similarity_threshold must be in (0.0, 1.0]");
    }

    if config.ranker.skip_below >= config.ranker.skip_above {
        anyhow::bail!("ranker.skip_below must be less than ranker.skip_above");
    }

    if config.ocr.models.is_empty() {
        anyhow::bail!("ocr.models must list at least one vision model");
    }

    Ok(config)
}
