//! Response assemblers: prompt → gateway → repair/parse → domain records.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::gateway::{
    Attribution, ContentGateway, ContentModel, FinishReason, GenerateRequest, GenerateResponse,
    ProviderError,
};
use crate::model::{
    dedup_and_rank, BenchmarkPoint, ComparisonResult, ComponentAnalysis, ComponentKind,
    LaptopAnalysis, LaptopRecord, RatingScale, SelectedBenchmark, Verdict,
};
use crate::prompts;
use crate::repair::{extract_json, extract_json_array, extract_json_value, MalformedResponse};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-2.5-flash-lite";

// =============================================================================
// Errors
// =============================================================================

/// Coarse failure category, for choosing what to tell the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidQuery,
    MalformedResponse,
    EmptyResponse,
    TransientService,
    PermanentService,
    NoResults,
}

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Malformed(#[from] MalformedResponse),

    #[error("the model returned an empty response")]
    EmptyResponse,

    #[error(transparent)]
    Service(ProviderError),

    #[error("no usable results for \"{query}\"")]
    NoResults { query: String },

    #[error("analysis of {component} failed on both models: primary: {primary}; fallback: {fallback}")]
    ComponentUnavailable {
        component: String,
        primary: ProviderError,
        fallback: ProviderError,
    },
}

impl From<ProviderError> for AdvisorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::EmptyResponse { .. } => AdvisorError::EmptyResponse,
            other => AdvisorError::Service(other),
        }
    }
}

impl AdvisorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdvisorError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            AdvisorError::Malformed(_) => ErrorKind::MalformedResponse,
            AdvisorError::EmptyResponse => ErrorKind::EmptyResponse,
            AdvisorError::Service(err) => service_kind(err),
            AdvisorError::NoResults { .. } => ErrorKind::NoResults,
            AdvisorError::ComponentUnavailable { fallback, .. } => service_kind(fallback),
        }
    }

    /// Message suitable for showing to the person who asked.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidQuery => "Please enter what you're looking for.",
            ErrorKind::MalformedResponse | ErrorKind::EmptyResponse => {
                "The AI's answer could not be understood. Try rephrasing your request."
            }
            ErrorKind::TransientService => {
                "The AI service is busy right now. Please try again in a moment."
            }
            ErrorKind::PermanentService => {
                "The AI service rejected the request. Check your configuration and try again."
            }
            ErrorKind::NoResults => {
                "No suitable laptops were found. Try being more specific or broader in your request."
            }
        }
    }
}

/// Any 5xx reads as temporary to the user even when it was not worth retrying.
fn service_kind(err: &ProviderError) -> ErrorKind {
    match err {
        ProviderError::EmptyResponse { .. } => ErrorKind::EmptyResponse,
        e if e.is_retryable() => ErrorKind::TransientService,
        e if matches!(e.http_status(), Some(500..=599)) => ErrorKind::TransientService,
        _ => ErrorKind::PermanentService,
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub primary: String,
    /// Cheaper model tried when the primary stays overloaded (component analysis only).
    pub fallback: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            primary: DEFAULT_MODEL.to_string(),
            fallback: DEFAULT_FALLBACK_MODEL.to_string(),
        }
    }
}

impl ModelConfig {
    /// Read `LAPTOP_LENS_MODEL` / `LAPTOP_LENS_FALLBACK_MODEL`, defaulting each.
    pub fn from_env() -> Self {
        let read = |key: &str, default: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            primary: read("LAPTOP_LENS_MODEL", DEFAULT_MODEL),
            fallback: read("LAPTOP_LENS_FALLBACK_MODEL", DEFAULT_FALLBACK_MODEL),
        }
    }
}

// =============================================================================
// Advisor
// =============================================================================

/// Entry point for all four use cases. Holds an explicitly constructed
/// gateway; clone freely, clones share the gateway.
#[derive(Clone)]
pub struct Advisor {
    gateway: Arc<dyn ContentGateway>,
    models: ModelConfig,
}

impl Advisor {
    pub fn new(gateway: Arc<dyn ContentGateway>, models: ModelConfig) -> Self {
        Self { gateway, models }
    }

    fn request(&self, prompt: String, caller: &'static str) -> GenerateRequest {
        GenerateRequest::new(
            ContentModel::gemini(&self.models.primary),
            prompt,
            Attribution::new(caller),
        )
    }

    /// Search-grounded comparison for a free-text query.
    pub async fn compare(&self, query: &str) -> Result<ComparisonResult, AdvisorError> {
        if query.trim().is_empty() {
            return Err(AdvisorError::InvalidQuery("query is empty".into()));
        }

        let req = self
            .request(prompts::comparison_prompt(query), "advisor::compare")
            .temperature(prompts::COMPARISON_TEMPERATURE)
            .grounded();
        let resp = self.gateway.generate(req).await?;

        let truncated = resp.finish_reason == FinishReason::MaxTokens;
        if truncated {
            warn!(
                query = query.trim(),
                "comparison hit the output token limit; the last laptop may be incomplete"
            );
        }

        let laptops: Vec<LaptopRecord> = extract_json(&resp.text)?
            .into_iter()
            .filter_map(|item| parse_record::<LaptopRecord>(item, "laptop"))
            .filter(LaptopRecord::is_usable)
            .map(|mut laptop| {
                laptop.rating_scale = RatingScale::OutOfTen;
                laptop
            })
            .collect();

        if laptops.is_empty() {
            return Err(AdvisorError::NoResults {
                query: query.trim().to_string(),
            });
        }

        info!(
            laptops = laptops.len(),
            citations = resp.citations.len(),
            "comparison assembled"
        );
        Ok(ComparisonResult {
            laptops,
            citations: resp.citations,
            truncated,
        })
    }

    /// Components scoring within ±15% of `base`, merged with `base` itself,
    /// deduplicated by name and ranked by score.
    pub async fn benchmark_peers(
        &self,
        base: &SelectedBenchmark,
    ) -> Result<Vec<BenchmarkPoint>, AdvisorError> {
        if base.name.trim().is_empty() {
            return Err(AdvisorError::InvalidQuery("component name is empty".into()));
        }

        let req = self
            .request(prompts::benchmark_peers_prompt(base), "advisor::benchmark_peers")
            .temperature(prompts::BENCHMARK_TEMPERATURE)
            .schema(prompts::benchmark_peers_schema(base.kind));
        let resp = self.gateway.generate(req).await?;

        let items = match serde_json::from_str::<Vec<Value>>(resp.text.trim()) {
            Ok(items) => items,
            Err(_) => extract_json_array(&resp.text)?,
        };

        let peers = items
            .into_iter()
            .filter_map(|item| parse_record::<BenchmarkPoint>(item, "benchmark"))
            .filter(|p| p.kind == base.kind && !p.name.trim().is_empty());

        // Base goes in first so a better-sourced duplicate from the model replaces it.
        Ok(dedup_and_rank(std::iter::once(base.to_point()).chain(peers)))
    }

    /// Structured analysis of one CPU or GPU, falling back to the secondary
    /// model when the primary stays overloaded.
    pub async fn analyze_component(
        &self,
        name: &str,
        kind: ComponentKind,
    ) -> Result<ComponentAnalysis, AdvisorError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AdvisorError::InvalidQuery("component name is empty".into()));
        }

        let req = self
            .request(
                prompts::component_analysis_prompt(name, kind),
                "advisor::analyze_component",
            )
            .temperature(prompts::ANALYSIS_TEMPERATURE)
            .schema(prompts::component_analysis_schema());

        let resp = match self.gateway.generate(req.clone()).await {
            Ok(resp) => resp,
            Err(primary) if primary.is_retryable() => {
                warn!(
                    component = name,
                    primary_model = %self.models.primary,
                    fallback_model = %self.models.fallback,
                    error = %primary,
                    "primary model unavailable; trying fallback"
                );
                let fallback_req = req.with_model(ContentModel::gemini(&self.models.fallback));
                match self.gateway.generate(fallback_req).await {
                    Ok(resp) => resp,
                    Err(fallback) => {
                        return Err(AdvisorError::ComponentUnavailable {
                            component: name.to_string(),
                            primary,
                            fallback,
                        })
                    }
                }
            }
            Err(other) => return Err(other.into()),
        };

        parse_analysis(&resp, name)
    }

    /// CPU and GPU analyses for one laptop, fetched concurrently. A component
    /// the record does not name is skipped.
    pub async fn analyze_laptop(&self, laptop: &LaptopRecord) -> Result<LaptopAnalysis, AdvisorError> {
        let cpu_name = laptop.specs.processor.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let gpu_name = laptop.specs.graphics.as_deref().map(str::trim).filter(|n| !n.is_empty());

        let cpu = async {
            match cpu_name {
                Some(name) => self.analyze_component(name, ComponentKind::Cpu).await.map(Some),
                None => Ok(None),
            }
        };
        let gpu = async {
            match gpu_name {
                Some(name) => self.analyze_component(name, ComponentKind::Gpu).await.map(Some),
                None => Ok(None),
            }
        };

        let (cpu, gpu) = tokio::join!(cpu, gpu);
        Ok(LaptopAnalysis { cpu: cpu?, gpu: gpu? })
    }

    /// Narrative recommendation among `laptops` for the stated priorities.
    pub async fn verdict(
        &self,
        laptops: &[LaptopRecord],
        priorities: &str,
    ) -> Result<Verdict, AdvisorError> {
        if priorities.trim().is_empty() {
            return Err(AdvisorError::InvalidQuery(
                "please describe what matters most to you".into(),
            ));
        }
        if laptops.is_empty() {
            return Err(AdvisorError::InvalidQuery("no laptops to compare".into()));
        }

        let req = self
            .request(prompts::verdict_prompt(laptops, priorities), "advisor::verdict")
            .temperature(prompts::VERDICT_TEMPERATURE);
        let resp = self.gateway.generate(req).await?;

        let text = resp.text.trim();
        if text.is_empty() {
            return Err(AdvisorError::EmptyResponse);
        }
        Ok(Verdict::from_text(text))
    }
}

fn parse_record<T: DeserializeOwned>(item: Value, what: &'static str) -> Option<T> {
    match serde_json::from_value::<T>(item) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, kind = what, "skipping record the model got wrong");
            None
        }
    }
}

fn parse_analysis(resp: &GenerateResponse, name: &str) -> Result<ComponentAnalysis, AdvisorError> {
    let value = match serde_json::from_str::<Value>(resp.text.trim()) {
        Ok(value) => value,
        Err(_) => extract_json_value(&resp.text)?,
    };

    let mut analysis: ComponentAnalysis =
        serde_json::from_value(value).map_err(|e| MalformedResponse {
            reason: format!("analysis does not match the expected shape: {e}"),
            raw: resp.text.clone(),
            candidate: None,
        })?;

    if analysis.name.trim().is_empty() {
        analysis.name = name.to_string();
    }
    Ok(analysis)
}
