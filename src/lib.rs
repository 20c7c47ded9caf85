#![forbid(unsafe_code)]

//! # laptop-lens
//!
//! Turns a natural-language laptop request into structured, comparable data
//! using a generative model.
//!
//! Model output is untrusted text: it may be fenced, prose-wrapped, carry
//! trailing commas or unbalanced brackets, and state benchmark scores as
//! free-form strings ("Cinebench R23: ~15,200"). This crate repairs and
//! normalizes that output ([`repair`], [`score`]), retries transient service
//! failures with exponential backoff ([`retry`]), falls back to a cheaper
//! model where that is acceptable, and assembles typed results ([`advisor`]).

pub mod advisor;
pub mod gateway;
pub mod model;
pub mod prompts;
pub mod repair;
pub mod retry;
pub mod score;

pub use advisor::{Advisor, AdvisorError, ErrorKind, ModelConfig};
pub use gateway::{
    Attribution, ContentGateway, GatewayConfig, GroundingCitation, ProviderError,
    ProviderGateway, UsageSink,
};
pub use model::{
    dedup_and_rank, BenchmarkPoint, ComparisonResult, ComponentAnalysis, ComponentKind,
    LaptopAnalysis, LaptopRecord, RatingScale, SelectedBenchmark, Verdict,
};
pub use repair::{extract_json, extract_json_array, MalformedResponse};
pub use retry::{invoke_with_retry, is_transient, RetryPolicy, Sleeper, TokioSleeper};
pub use score::extract_score;
