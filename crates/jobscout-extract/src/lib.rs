//! LLM-backed posting extraction.
//!
//! The language model is a black box behind [`LanguageModel`]: text in,
//! JSON out, with token counts and a dollar cost per call. Everything
//! else here is deterministic: prompt assembly, schema validation, and
//! per-run cost metering.

use async_trait::async_trait;
use thiserror::Error;

pub mod anthropic;
pub mod engine;
pub mod schema;

pub use anthropic::AnthropicModel;
pub use engine::{ExtractConfig, ExtractionEngine, ExtractionReport};
pub use schema::{ExtractionPayload, ValidationError};

pub const CRATE_NAME: &str = "jobscout-extract";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,
    #[error("llm transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("llm api status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("llm response missing content")]
    EmptyResponse,
}

impl LlmError {
    /// Transient failures are worth retrying with backoff; the rest are
    /// configuration or contract problems.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::MissingApiKey | Self::EmptyResponse => false,
        }
    }
}

/// One completion: the raw text plus what it cost.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, LlmError>;

    fn model_name(&self) -> &str;
}

/// Run-scoped spend tracker. Owned by one pipeline run; never shared
/// across runs, so a fresh run always starts from zero.
#[derive(Debug, Clone)]
pub struct CostMeter {
    budget_usd: f64,
    spent_usd: f64,
    calls: u32,
}

impl CostMeter {
    pub fn new(budget_usd: f64) -> Self {
        Self {
            budget_usd,
            spent_usd: 0.0,
            calls: 0,
        }
    }

    pub fn record(&mut self, cost_usd: f64) {
        self.spent_usd += cost_usd;
        self.calls += 1;
    }

    pub fn exhausted(&self) -> bool {
        self.spent_usd >= self.budget_usd
    }

    pub fn spent_usd(&self) -> f64 {
        self.spent_usd
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }
}
