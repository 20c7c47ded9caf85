//! Prompt templates and response schemas for each assembler call site.
//!
//! Domain logic for rendering prompts. Provider-agnostic apart from the
//! schema types, which mirror what schema-constrained output accepts.

use crate::gateway::ResponseSchema;
use crate::model::{ComponentKind, LaptopRecord, SelectedBenchmark};

/// Strip characters that would let user text break out of its quoted slot.
fn quote_user_text(s: &str) -> String {
    s.trim().replace('"', "'").replace(['\r', '\n'], " ")
}

// =============================================================================
// Comparison
// =============================================================================

const COMPARISON_TEMPLATE: &str = r#"You are a world-class tech analyst specializing in the latest laptops. Your goal is to provide a highly detailed, current comparison of laptops based on the user's query, focusing on the very latest models and components. Use Google Search to find the most relevant, current information.

Your response MUST be a single JSON object inside a markdown code block. Do not include any text outside of the JSON block.

The JSON object must have a key "comparisons" which is an array of 2-4 laptop objects. Each object must have this exact structure:
{
  "brand": "string",
  "model": "string",
  "rating": "number (out of 10)",
  "summary": "string",
  "price": "number (approximate street price in USD)",
  "releaseDate": "string",
  "status": "string (e.g. 'Available', 'Upcoming')",
  "ratingBreakdown": { "performance": "number", "value": "number", "quality": "number" },
  "gamingPerformance": { "1080p": "string", "1440p": "string" },
  "productivityScores": [{ "task": "string", "score": "number (out of 10)" }],
  "specs": {
    "Processor": "string",
    "RAM": "string",
    "Storage": "string",
    "Display": "string",
    "Graphics": "string",
    "Weight": "string",
    "Ports": "string",
    "cpuBenchmark": "string (e.g., 'Cinebench R23: ~15200')",
    "gpuBenchmark": "string (e.g., '3DMark Time Spy: ~8500')"
  },
  "pros": ["string"],
  "cons": ["string"]
}

User Query: "{query}""#;

/// Sampling temperature for comparison searches.
pub const COMPARISON_TEMPERATURE: f32 = 0.1;

pub fn comparison_prompt(query: &str) -> String {
    COMPARISON_TEMPLATE.replace("{query}", &quote_user_text(query))
}

// =============================================================================
// Benchmark peers
// =============================================================================

pub const BENCHMARK_TEMPERATURE: f32 = 0.3;

pub fn benchmark_peers_prompt(base: &SelectedBenchmark) -> String {
    let (lower, upper) = base.peer_bounds();
    let kind = base.kind.as_str();
    format!(
        "Based on the provided component, find 5-10 other commercially available laptop {kind}s \
         that have a benchmark score between {lower} and {upper}. The original component is \
         \"{name}\" with a score of {score}. Do not include the original component in your \
         response. Provide a common benchmark source URL for the scores, like PassMark or \
         NotebookCheck. The type for all items should be \"{kind}\".",
        name = quote_user_text(&base.name),
        score = base.score,
    )
}

pub fn benchmark_peers_schema(kind: ComponentKind) -> ResponseSchema {
    let kind = kind.as_str();
    ResponseSchema::array(
        ResponseSchema::object()
            .required(
                "name",
                ResponseSchema::string()
                    .describe("The name of the component (e.g., \"Intel Core Ultra 7 155H\")"),
            )
            .required(
                "score",
                ResponseSchema::number().describe("The benchmark score."),
            )
            .required(
                "type",
                ResponseSchema::string()
                    .one_of([kind])
                    .describe(format!("The component type, which must be \"{kind}\".")),
            )
            .required(
                "source",
                ResponseSchema::string().describe("A URL to the benchmark source."),
            ),
    )
}

// =============================================================================
// Component analysis
// =============================================================================

pub const ANALYSIS_TEMPERATURE: f32 = 0.2;

pub fn component_analysis_prompt(name: &str, kind: ComponentKind) -> String {
    format!(
        "You are a hardware reviewer. Give a concise, factual analysis of the laptop {kind} \
         \"{name}\". Summarize where it sits in the current market in 2-3 sentences, list its key \
         specifications (cores/threads, clocks, cache or VRAM, TDP, process node where \
         applicable), and list 3-5 strengths and 3-5 weaknesses for laptop buyers.",
        kind = kind.as_str(),
        name = quote_user_text(name),
    )
}

pub fn component_analysis_schema() -> ResponseSchema {
    ResponseSchema::object()
        .required("name", ResponseSchema::string().describe("Component name."))
        .required(
            "summary",
            ResponseSchema::string().describe("Two to three sentence overview."),
        )
        .required(
            "specs",
            ResponseSchema::array(
                ResponseSchema::object()
                    .required("name", ResponseSchema::string())
                    .required("value", ResponseSchema::string()),
            ),
        )
        .required("strengths", ResponseSchema::array(ResponseSchema::string()))
        .required("weaknesses", ResponseSchema::array(ResponseSchema::string()))
}

// =============================================================================
// Verdict
// =============================================================================

pub const VERDICT_TEMPERATURE: f32 = 0.5;

pub fn verdict_prompt(laptops: &[LaptopRecord], priorities: &str) -> String {
    let mut prompt = String::from(
        "You are an expert laptop advisor. Compare the following laptops for a buyer and give a \
         tailored recommendation.\n\n## Laptops\n",
    );

    for laptop in laptops {
        prompt.push_str(&format!("\n### {}\n", laptop.display_name()));
        if let Some(rating) = laptop.normalized_rating() {
            prompt.push_str(&format!("- Rating: {rating:.1}/10\n"));
        }
        let specs = &laptop.specs;
        let named = [
            ("Processor", &specs.processor),
            ("Graphics", &specs.graphics),
            ("RAM", &specs.ram),
            ("Storage", &specs.storage),
            ("Display", &specs.display),
            ("Weight", &specs.weight),
            ("CPU benchmark", &specs.cpu_benchmark),
            ("GPU benchmark", &specs.gpu_benchmark),
        ];
        for (label, value) in named {
            if let Some(value) = value {
                prompt.push_str(&format!("- {label}: {value}\n"));
            }
        }
        if !laptop.pros.is_empty() {
            prompt.push_str(&format!("- Pros: {}\n", laptop.pros.join("; ")));
        }
        if !laptop.cons.is_empty() {
            prompt.push_str(&format!("- Cons: {}\n", laptop.cons.join("; ")));
        }
    }

    prompt.push_str(&format!(
        "\n## Buyer priorities\n\"{}\"\n\n\
         Write a short analysis covering how each laptop serves these priorities. Use **bold** \
         for key points. End with a line that starts with \"**Final Recommendation:**\" naming \
         the single best choice and why.",
        quote_user_text(priorities)
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn comparison_prompt_quotes_query() {
        let prompt = comparison_prompt("compare \"MacBook Air\"\nvs XPS");
        assert!(prompt.ends_with("User Query: \"compare 'MacBook Air' vs XPS\""));
        assert!(prompt.contains("\"comparisons\""));
    }

    #[test]
    fn benchmark_prompt_names_bounds() {
        let base = SelectedBenchmark::new("Apple M3", 10_000, ComponentKind::Cpu);
        let prompt = benchmark_peers_prompt(&base);
        assert!(prompt.contains("between 8500 and 11500"));
        assert!(prompt.contains("laptop CPUs"));
        assert!(prompt.contains("\"Apple M3\" with a score of 10000"));
    }

    #[test]
    fn benchmark_schema_pins_type() {
        let value = benchmark_peers_schema(ComponentKind::Gpu).to_value();
        assert_eq!(value["items"]["properties"]["type"]["enum"], json!(["GPU"]));
        assert_eq!(
            value["items"]["required"],
            json!(["name", "score", "type", "source"])
        );
    }

    #[test]
    fn verdict_prompt_lists_laptops() {
        let laptop: LaptopRecord = serde_json::from_value(json!({
            "brand": "Dell", "model": "XPS 13", "rating": 4.5,
            "specs": { "Processor": "Core Ultra 7" }, "pros": ["Light", "Sharp screen"]
        }))
        .unwrap();
        let prompt = verdict_prompt(&[laptop], "battery life");
        assert!(prompt.contains("### Dell XPS 13"));
        assert!(prompt.contains("- Rating: 9.0/10"));
        assert!(prompt.contains("- Processor: Core Ultra 7"));
        assert!(prompt.contains("- Pros: Light; Sharp screen"));
        assert!(prompt.contains("\"battery life\""));
        assert!(prompt.contains("**Final Recommendation:**"));
    }
}
