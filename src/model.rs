//! Domain records produced by the assemblers.
//!
//! Deserialization is deliberately forgiving: models emit numbers where
//! strings were asked for, ratings like "4.5/5", and omit fields at will.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::score::extract_score;

pub use crate::gateway::GroundingCitation;

// =============================================================================
// Lenient field helpers
// =============================================================================

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .split('/')
            .next()
            .and_then(|head| head.trim().trim_start_matches('~').parse::<f64>().ok()),
        _ => None,
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(value_to_string(Value::deserialize(de)?).unwrap_or_default())
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(value_to_string(Value::deserialize(de)?))
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(de)?;
    Ok(value_to_f64(&value).filter(|v| v.is_finite()))
}

fn lenient_strings<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Array(items) => items.into_iter().filter_map(value_to_string).collect(),
        Value::Null => Vec::new(),
        single => value_to_string(single).into_iter().collect(),
    })
}

/// Nested object; null or a non-object ("N/A", "8/10") becomes `None`.
fn lenient_opt_struct<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(de)? {
        value @ Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    })
}

/// Like [`lenient_opt_struct`], falling back to the default value.
fn lenient_struct<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient_opt_struct(de)?.unwrap_or_default())
}

/// Array of records; a non-array becomes empty and bad elements are dropped.
fn lenient_vec<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(de)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_source<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(value_to_string(Value::deserialize(de)?)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default_source))
}

/// Score as a non-negative integer: numbers are rounded, strings go through
/// the numeric extractor.
fn lenient_score<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(de)?;
    let score = match &value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => extract_score(Some(s.as_str())),
        _ => None,
    };
    score.ok_or_else(|| serde::de::Error::custom(format!("invalid benchmark score: {value}")))
}

// =============================================================================
// Laptop records
// =============================================================================

/// Scale a model-reported rating is expressed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RatingScale {
    #[default]
    OutOfFive,
    OutOfTen,
}

impl RatingScale {
    pub fn max(&self) -> f64 {
        match self {
            RatingScale::OutOfFive => 5.0,
            RatingScale::OutOfTen => 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LaptopSpecs {
    #[serde(rename = "Processor", default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,
    #[serde(rename = "RAM", default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub ram: Option<String>,
    #[serde(rename = "Storage", default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    #[serde(rename = "Display", default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(rename = "Graphics", default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub graphics: Option<String>,
    #[serde(rename = "Weight", default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(rename = "Ports", default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub ports: Option<String>,
    #[serde(rename = "cpuBenchmark", default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub cpu_benchmark: Option<String>,
    #[serde(rename = "gpuBenchmark", default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub gpu_benchmark: Option<String>,
    /// Any other attribute the model reported, keyed by its name.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RatingBreakdown {
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub performance: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub quality: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GamingPerformance {
    #[serde(rename = "1080p", default, deserialize_with = "lenient_opt_string")]
    pub fhd: Option<String>,
    #[serde(rename = "1440p", default, deserialize_with = "lenient_opt_string")]
    pub qhd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivityScore {
    #[serde(default, deserialize_with = "lenient_string")]
    pub task: String,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub score: Option<f64>,
}

/// One laptop as described by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaptopRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub brand: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub model: String,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub rating: Option<f64>,
    /// Scale of `rating`; set by the assembler that requested the record.
    #[serde(default)]
    pub rating_scale: RatingScale,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_struct")]
    pub specs: LaptopSpecs,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub pros: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub cons: Vec<String>,
    #[serde(default, deserialize_with = "lenient_opt_f64", skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_struct", skip_serializing_if = "Option::is_none")]
    pub rating_breakdown: Option<RatingBreakdown>,
    #[serde(default, deserialize_with = "lenient_opt_struct", skip_serializing_if = "Option::is_none")]
    pub gaming_performance: Option<GamingPerformance>,
    #[serde(default, deserialize_with = "lenient_vec", skip_serializing_if = "Vec::is_empty")]
    pub productivity_scores: Vec<ProductivityScore>,
}

impl LaptopRecord {
    /// Display name, e.g. "Dell XPS 13".
    pub fn display_name(&self) -> String {
        format!("{} {}", self.brand.trim(), self.model.trim())
            .trim()
            .to_string()
    }

    /// Canonical CPU benchmark score derived from `specs.cpuBenchmark`.
    pub fn cpu_score(&self) -> Option<u64> {
        extract_score(self.specs.cpu_benchmark.as_deref())
    }

    /// Canonical GPU benchmark score derived from `specs.gpuBenchmark`.
    pub fn gpu_score(&self) -> Option<u64> {
        extract_score(self.specs.gpu_benchmark.as_deref())
    }

    /// Rating converted to a 0-10 scale.
    pub fn normalized_rating(&self) -> Option<f64> {
        self.rating
            .map(|r| (r * 10.0 / self.rating_scale.max()).clamp(0.0, 10.0))
    }

    /// Whether the record names an actual laptop.
    pub fn is_usable(&self) -> bool {
        !self.model.trim().is_empty()
    }
}

// =============================================================================
// Benchmarks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    #[serde(rename = "CPU", alias = "cpu")]
    Cpu,
    #[serde(rename = "GPU", alias = "gpu")]
    Gpu,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Cpu => "CPU",
            ComponentKind::Gpu => "GPU",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source value for entries without a citable benchmark source.
pub const NO_SOURCE: &str = "N/A";

/// One component's position on a performance scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkPoint {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_score")]
    pub score: u64,
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(default = "default_source", deserialize_with = "lenient_source")]
    pub source: String,
}

fn default_source() -> String {
    NO_SOURCE.to_string()
}

impl BenchmarkPoint {
    pub fn new(name: impl Into<String>, score: u64, kind: ComponentKind, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score,
            kind,
            source: source.into(),
        }
    }

    /// Key used for deduplication: trimmed, lowercased name.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Deduplicate by normalized name (last one inserted wins) and sort by score
/// descending; equal scores are ordered by name.
pub fn dedup_and_rank<I>(points: I) -> Vec<BenchmarkPoint>
where
    I: IntoIterator<Item = BenchmarkPoint>,
{
    let mut unique: HashMap<String, BenchmarkPoint> = HashMap::new();
    for point in points {
        unique.insert(point.normalized_name(), point);
    }

    let mut ranked: Vec<BenchmarkPoint> = unique.into_values().collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
    ranked
}

/// The component a peer lookup starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedBenchmark {
    pub name: String,
    pub score: u64,
    #[serde(rename = "type")]
    pub kind: ComponentKind,
}

impl SelectedBenchmark {
    pub fn new(name: impl Into<String>, score: u64, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            score,
            kind,
        }
    }

    /// Derive from a laptop's processor/graphics name and benchmark string.
    /// `None` when the component name is missing or no score can be extracted.
    pub fn from_laptop(laptop: &LaptopRecord, kind: ComponentKind) -> Option<Self> {
        let (name, score) = match kind {
            ComponentKind::Cpu => (laptop.specs.processor.as_deref(), laptop.cpu_score()),
            ComponentKind::Gpu => (laptop.specs.graphics.as_deref(), laptop.gpu_score()),
        };
        let name = name.map(str::trim).filter(|n| !n.is_empty())?;
        Some(Self::new(name, score?, kind))
    }

    /// Self-entry for the peer chart.
    pub fn to_point(&self) -> BenchmarkPoint {
        BenchmarkPoint::new(self.name.clone(), self.score, self.kind, NO_SOURCE)
    }

    /// Score window (±15%) peers are asked to fall within.
    pub fn peer_bounds(&self) -> (u64, u64) {
        let score = self.score as f64;
        ((score * 0.85).round() as u64, (score * 1.15).round() as u64)
    }
}

// =============================================================================
// Component analysis
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
}

/// Structured opinion about a single CPU or GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentAnalysis {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default)]
    pub specs: Vec<SpecEntry>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub strengths: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub weaknesses: Vec<String>,
}

// =============================================================================
// Results
// =============================================================================

/// Laptops found for a query plus the sources the model cited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub laptops: Vec<LaptopRecord>,
    pub citations: Vec<GroundingCitation>,
    /// The answer was cut off at the output token limit.
    #[serde(default)]
    pub truncated: bool,
}

/// CPU and GPU analyses for one laptop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaptopAnalysis {
    pub cpu: Option<ComponentAnalysis>,
    pub gpu: Option<ComponentAnalysis>,
}

const CONCLUSION_MARKER: &str = "final recommendation:";

/// Narrative verdict, split at the "Final Recommendation:" heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub text: String,
    pub analysis: String,
    pub conclusion: Option<String>,
}

impl Verdict {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        // ASCII lowercasing keeps byte offsets aligned with `text`.
        let lower = text.to_ascii_lowercase();

        let split = lower.rfind(CONCLUSION_MARKER).map(|idx| {
            let line_start = text[..idx].rfind('\n').map(|i| i + 1).unwrap_or(0);
            let analysis = text[..line_start].trim_end().to_string();
            let conclusion = text[idx + CONCLUSION_MARKER.len()..]
                .trim_start_matches(['*', '_', ' '])
                .trim()
                .to_string();
            (analysis, conclusion)
        });

        match split {
            Some((analysis, conclusion)) if !analysis.is_empty() && !conclusion.is_empty() => {
                Self {
                    text,
                    analysis,
                    conclusion: Some(conclusion),
                }
            }
            _ => Self {
                analysis: text.trim().to_string(),
                text,
                conclusion: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn laptop_record_tolerates_loose_types() {
        let record: LaptopRecord = serde_json::from_value(json!({
            "brand": "Apple",
            "model": "MacBook Air M3",
            "rating": "4.5/5",
            "specs": { "RAM": 16, "cpuBenchmark": "Cinebench R23: ~15,200", "Battery": "18h" },
            "pros": "Silent",
            "price": 114900
        }))
        .unwrap();

        assert_eq!(record.rating, Some(4.5));
        assert_eq!(record.specs.ram.as_deref(), Some("16"));
        assert_eq!(record.specs.other.get("Battery"), Some(&json!("18h")));
        assert_eq!(record.pros, vec!["Silent".to_string()]);
        assert!(record.cons.is_empty());
        assert_eq!(record.cpu_score(), Some(15_200));
        assert_eq!(record.gpu_score(), None);
        assert_eq!(record.price, Some(114_900.0));
    }

    #[test]
    fn extended_fields_parse() {
        let record: LaptopRecord = serde_json::from_value(json!({
            "brand": "ASUS",
            "model": "ROG Zephyrus G14",
            "ratingBreakdown": { "performance": 9, "value": "7.5", "quality": 8.5 },
            "gamingPerformance": { "1080p": "120 fps", "1440p": 85 },
            "productivityScores": [{ "task": "Video editing", "score": 8 }]
        }))
        .unwrap();

        let breakdown = record.rating_breakdown.unwrap();
        assert_eq!(breakdown.value, Some(7.5));
        let gaming = record.gaming_performance.unwrap();
        assert_eq!(gaming.qhd.as_deref(), Some("85"));
        assert_eq!(record.productivity_scores[0].score, Some(8.0));
    }

    #[test]
    fn nested_fields_tolerate_null_and_placeholders() {
        let record: LaptopRecord = serde_json::from_value(json!({
            "brand": "Dell",
            "model": "XPS 13",
            "specs": null,
            "ratingBreakdown": "8/10",
            "gamingPerformance": "N/A",
            "productivityScores": null
        }))
        .unwrap();
        assert!(record.is_usable());
        assert_eq!(record.specs, LaptopSpecs::default());
        assert!(record.rating_breakdown.is_none());
        assert!(record.gaming_performance.is_none());
        assert!(record.productivity_scores.is_empty());

        let record: LaptopRecord = serde_json::from_value(json!({
            "model": "Zenbook 14",
            "specs": "see website",
            "productivityScores": [{ "task": "Coding", "score": "9/10" }, "fast", null]
        }))
        .unwrap();
        assert_eq!(record.specs, LaptopSpecs::default());
        assert_eq!(record.productivity_scores.len(), 1);
        assert_eq!(record.productivity_scores[0].score, Some(9.0));
    }

    #[test]
    fn normalized_rating_respects_scale() {
        let mut record: LaptopRecord =
            serde_json::from_value(json!({ "model": "X", "rating": 4.0 })).unwrap();
        assert_eq!(record.normalized_rating(), Some(8.0));
        record.rating_scale = RatingScale::OutOfTen;
        assert_eq!(record.normalized_rating(), Some(4.0));
    }

    #[test]
    fn benchmark_point_scores_are_non_negative_integers() {
        let p: BenchmarkPoint = serde_json::from_value(json!({
            "name": "Ryzen 7 8840HS", "score": 15123.6, "type": "CPU", "source": "https://example.com"
        }))
        .unwrap();
        assert_eq!(p.score, 15_124);

        let p: BenchmarkPoint =
            serde_json::from_value(json!({ "name": "RTX 4060", "score": "~10,500", "type": "GPU" }))
                .unwrap();
        assert_eq!(p.score, 10_500);
        assert_eq!(p.source, NO_SOURCE);

        let p: BenchmarkPoint = serde_json::from_value(
            json!({ "name": "Apple M3", "score": 14000, "type": "CPU", "source": null }),
        )
        .unwrap();
        assert_eq!(p.source, NO_SOURCE);

        let p: BenchmarkPoint = serde_json::from_value(
            json!({ "name": "Apple M3", "score": 14000, "type": "CPU", "source": "  " }),
        )
        .unwrap();
        assert_eq!(p.source, NO_SOURCE);

        let bad = serde_json::from_value::<BenchmarkPoint>(
            json!({ "name": "X", "score": -4, "type": "GPU" }),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn dedup_is_case_and_whitespace_insensitive() {
        let ranked = dedup_and_rank(vec![
            BenchmarkPoint::new("Intel Core i7", 100, ComponentKind::Cpu, NO_SOURCE),
            BenchmarkPoint::new("intel core i7 ", 120, ComponentKind::Cpu, "https://x"),
        ]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 120);
        assert_eq!(ranked[0].source, "https://x");
    }

    #[test]
    fn ranking_is_descending() {
        let ranked = dedup_and_rank(vec![
            BenchmarkPoint::new("B", 10, ComponentKind::Gpu, NO_SOURCE),
            BenchmarkPoint::new("A", 30, ComponentKind::Gpu, NO_SOURCE),
            BenchmarkPoint::new("C", 20, ComponentKind::Gpu, NO_SOURCE),
            BenchmarkPoint::new("D", 20, ComponentKind::Gpu, NO_SOURCE),
        ]);
        let names: Vec<&str> = ranked.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C", "D", "B"]);
    }

    #[test]
    fn selected_benchmark_from_laptop() {
        let record: LaptopRecord = serde_json::from_value(json!({
            "model": "XPS 13",
            "specs": { "Processor": " Intel Core Ultra 7 155H ", "cpuBenchmark": "Cinebench: 15,000", "Graphics": "Intel Arc" }
        }))
        .unwrap();

        let cpu = SelectedBenchmark::from_laptop(&record, ComponentKind::Cpu).unwrap();
        assert_eq!(cpu.name, "Intel Core Ultra 7 155H");
        assert_eq!(cpu.score, 15_000);
        assert_eq!(cpu.peer_bounds(), (12_750, 17_250));
        assert!(SelectedBenchmark::from_laptop(&record, ComponentKind::Gpu).is_none());
    }

    #[test]
    fn verdict_splits_at_final_recommendation() {
        let verdict = Verdict::from_text(
            "**Performance:** The XPS wins.\n\n**Final Recommendation:** Buy the XPS 13.",
        );
        assert_eq!(verdict.analysis, "**Performance:** The XPS wins.");
        assert_eq!(verdict.conclusion.as_deref(), Some("Buy the XPS 13."));
    }

    #[test]
    fn verdict_without_marker_is_all_analysis() {
        let verdict = Verdict::from_text("  Both are fine.  ");
        assert_eq!(verdict.analysis, "Both are fine.");
        assert!(verdict.conclusion.is_none());
    }
}
