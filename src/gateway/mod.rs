//! Provider gateway for Gemini generateContent calls.

pub mod error;
pub mod gemini;
pub mod types;
pub mod usage;

use std::sync::Arc;

use gemini::{ContentProvider, GeminiAdapter};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

use crate::retry::{invoke_with_retry, RetryPolicy, Sleeper, TokioSleeper};

pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

/// Seam between the assemblers and the transport.
///
/// Implementations retry transient failures themselves; a returned error is
/// final for the model named in the request.
#[async_trait::async_trait]
pub trait ContentGateway: Send + Sync {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError>;
}

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub retry: RetryPolicy,
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    gemini: GeminiAdapter,
    usage_sink: Arc<U>,
    config: GatewayConfig,
    sleeper: Arc<dyn Sleeper>,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ContentGateway for ProviderGateway<U> {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        ProviderGateway::generate(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let gemini = GeminiAdapter::from_env()?;
        Ok(Self::with_config(gemini, usage_sink, GatewayConfig::default()))
    }

    pub fn with_config(gemini: GeminiAdapter, usage_sink: Arc<U>, config: GatewayConfig) -> Self {
        Self {
            gemini,
            usage_sink,
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the backoff sleeper (tests record delays instead of waiting).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let req = &req;
        invoke_with_retry(&self.config.retry, self.sleeper.as_ref(), || self.attempt(req)).await
    }

    async fn attempt(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let result = self.gemini.generate(req).await;
        match &result {
            Ok(resp) => self.record_usage(req, Some(resp), None).await,
            Err(err) => {
                self.record_usage(req, None, Some(err.code().to_string()))
                    .await
            }
        }
        result
    }

    async fn record_usage(
        &self,
        req: &GenerateRequest,
        resp: Option<&GenerateResponse>,
        error_code: Option<String>,
    ) {
        let mut record = ProviderCallRecord::new(
            req.model.provider(),
            "generateContent",
            req.model.model_id(),
            req.attribution.caller,
        )
        .grounded(req.grounding);

        if let Some(resp) = resp {
            record = record
                .tokens(resp.input_tokens, resp.output_tokens)
                .latency(resp.latency.as_millis() as u64);
        }

        if let Some(code) = error_code {
            record = record.error(code);
        }

        self.usage_sink.record(record).await;
    }
}
