//! Core types for the provider gateway.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for usage tracking and debugging.
#[derive(Debug, Clone, Copy, Default)]
pub struct Attribution {
    /// Which code path made this call.
    /// Use a static string like "advisor::compare".
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self { caller }
    }
}

// =============================================================================
// MODEL
// =============================================================================

/// Generative model specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentModel {
    /// Gemini model, e.g. "gemini-2.5-flash"
    Gemini(String),
}

impl ContentModel {
    pub fn gemini(model_id: impl Into<String>) -> Self {
        ContentModel::Gemini(model_id.into())
    }

    pub fn model_id(&self) -> &str {
        match self {
            ContentModel::Gemini(id) => id,
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            ContentModel::Gemini(_) => "gemini",
        }
    }
}

// =============================================================================
// RESPONSE SCHEMA
// =============================================================================

/// Primitive and composite types understood by schema-constrained output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    String,
    Number,
    Array,
    Object,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::String => "STRING",
            SchemaType::Number => "NUMBER",
            SchemaType::Array => "ARRAY",
            SchemaType::Object => "OBJECT",
        }
    }
}

/// A named field of an object schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub schema: ResponseSchema,
    pub required: bool,
}

/// Shape the model's JSON answer must follow.
///
/// Object fields keep their declaration order; the order is sent upstream as
/// `propertyOrdering` so the model emits keys in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub kind: SchemaType,
    pub description: Option<String>,
    pub enum_values: Vec<String>,
    pub items: Option<Box<ResponseSchema>>,
    pub fields: Vec<SchemaField>,
}

impl ResponseSchema {
    fn of(kind: SchemaType) -> Self {
        Self {
            kind,
            description: None,
            enum_values: Vec::new(),
            items: None,
            fields: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    pub fn number() -> Self {
        Self::of(SchemaType::Number)
    }

    pub fn array(items: ResponseSchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(SchemaType::Array)
        }
    }

    pub fn object() -> Self {
        Self::of(SchemaType::Object)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn required(mut self, name: impl Into<String>, schema: ResponseSchema) -> Self {
        self.fields.push(SchemaField {
            name: name.into(),
            schema,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, schema: ResponseSchema) -> Self {
        self.fields.push(SchemaField {
            name: name.into(),
            schema,
            required: false,
        });
        self
    }

    /// Render as the OpenAPI-subset JSON the Gemini API expects.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), json!(self.kind.as_str()));
        if let Some(desc) = &self.description {
            out.insert("description".into(), json!(desc));
        }
        if !self.enum_values.is_empty() {
            out.insert("enum".into(), json!(self.enum_values));
        }
        if let Some(items) = &self.items {
            out.insert("items".into(), items.to_value());
        }
        if !self.fields.is_empty() {
            let properties: Map<String, Value> = self
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.schema.to_value()))
                .collect();
            let ordering: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
            let required: Vec<&str> = self
                .fields
                .iter()
                .filter(|f| f.required)
                .map(|f| f.name.as_str())
                .collect();

            out.insert("properties".into(), Value::Object(properties));
            out.insert("propertyOrdering".into(), json!(ordering));
            if !required.is_empty() {
                out.insert("required".into(), json!(required));
            }
        }
        Value::Object(out)
    }
}

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// Request for a single generateContent call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Model to use.
    pub model: ContentModel,
    /// Prompt text.
    pub prompt: String,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
    /// When set, the model answers with JSON of this shape.
    pub response_schema: Option<ResponseSchema>,
    /// Whether to enable search grounding.
    pub grounding: bool,
    /// Attribution for usage tracking.
    pub attribution: Attribution,
}

impl GenerateRequest {
    pub fn new(model: ContentModel, prompt: impl Into<String>, attribution: Attribution) -> Self {
        Self {
            model,
            prompt: prompt.into(),
            temperature: 0.0,
            response_schema: None,
            grounding: false,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn schema(mut self, schema: ResponseSchema) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn grounded(mut self) -> Self {
        self.grounding = true;
        self
    }

    /// Same request against a different model.
    pub fn with_model(mut self, model: ContentModel) -> Self {
        self.model = model;
        self
    }
}

/// A source the model claims to have used for a grounded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingCitation {
    pub uri: String,
    pub title: String,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("STOP") => FinishReason::Stop,
            Some("MAX_TOKENS") => FinishReason::MaxTokens,
            Some("SAFETY") => FinishReason::Safety,
            Some("RECITATION") => FinishReason::Recitation,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// Response from a generateContent call.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Concatenated text of the first candidate.
    pub text: String,
    /// Grounding citations, empty unless grounding was requested.
    pub citations: Vec<GroundingCitation>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency: Duration,
    pub finish_reason: FinishReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_keeps_field_order_and_required_list() {
        let schema = ResponseSchema::object()
            .required("name", ResponseSchema::string().describe("Component name"))
            .required("score", ResponseSchema::number())
            .optional("source", ResponseSchema::string());

        let value = schema.to_value();
        assert_eq!(value["type"], "OBJECT");
        assert_eq!(value["propertyOrdering"], json!(["name", "score", "source"]));
        assert_eq!(value["required"], json!(["name", "score"]));
        assert_eq!(value["properties"]["name"]["description"], "Component name");
    }

    #[test]
    fn array_schema_nests_items_and_enums() {
        let schema = ResponseSchema::array(
            ResponseSchema::object().required("type", ResponseSchema::string().one_of(["CPU"])),
        );
        let value = schema.to_value();
        assert_eq!(value["type"], "ARRAY");
        assert_eq!(value["items"]["properties"]["type"]["enum"], json!(["CPU"]));
        assert!(value.get("required").is_none());
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(FinishReason::from(Some("STOP".into())), FinishReason::Stop);
        assert_eq!(
            FinishReason::from(None),
            FinishReason::Unknown("none".to_string())
        );
    }
}
