//! Maps the plant health API's response onto a fixed diagnosis shape.
//!
//! The upstream schema has changed between API versions. Both the current
//! `result.{is_healthy,disease.suggestions}` layout and the legacy
//! `health_assessment.{is_healthy_probability,diseases}` layout are read into
//! one [`Assessment`], and anything else lands in [`Assessment::Unrecognized`].
//! Normalization never fails: missing data is filled with generic text.

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A plant is reported healthy only above this probability.
pub const HEALTHY_THRESHOLD: f64 = 0.7;

const MAX_BIOLOGICAL: usize = 3;
const MAX_CHEMICAL: usize = 2;
const MAX_PREVENTION: usize = 5;

pub const UNKNOWN_DISEASE: &str = "Unknown Disease";
pub const UNKNOWN_DESCRIPTION: &str = "Unable to identify the specific disease.";
const NO_DESCRIPTION: &str = "No description available.";

pub const HEALTHY_NAME: &str = "Healthy Plant";
const HEALTHY_DESCRIPTION: &str =
    "No signs of disease were detected. The plant appears to be in good health.";

const HEALTHY_TREATMENTS: [&str; 3] = [
    "No treatment needed; continue the current care routine",
    "Keep watering and fertilizing on a consistent schedule",
    "Keep monitoring leaves and stems for early changes",
];

const HEALTHY_PREVENTION: [&str; 5] = [
    "Water at the base of the plant to keep foliage dry",
    "Maintain good spacing and air circulation",
    "Remove fallen leaves and plant debris regularly",
    "Inspect plants weekly for pests and discoloration",
    "Rotate crops between seasons",
];

const FALLBACK_TREATMENTS: [&str; 5] = [
    "Remove and destroy affected leaves or plant parts",
    "Apply a fungicide or bactericide recommended by your local agricultural extension",
    "Improve air circulation around the plants",
    "Avoid overhead watering and water early in the day",
    "Isolate affected plants to limit spread",
];

const FALLBACK_PREVENTION: [&str; 5] = [
    "Use certified disease-free seeds and resistant varieties",
    "Practice crop rotation",
    "Keep proper spacing between plants",
    "Sanitize tools and remove crop residue after harvest",
    "Monitor plants regularly for early symptoms",
];

/// The fixed result shape produced from any upstream response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub disease_name: String,
    pub confidence: u8,
    pub description: String,
    pub treatments: Vec<String>,
    pub prevention_methods: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Treatment {
    pub biological: Vec<String>,
    pub chemical: Vec<String>,
    pub prevention: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub name: Option<String>,
    pub probability: f64,
    pub redundant: bool,
    pub description: Option<String>,
    pub treatment: Treatment,
}

/// Known readings of an upstream response.
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    Healthy { probability: f64 },
    DiseaseSuggestion { suggestions: Vec<Suggestion> },
    /// A recognized layout carrying neither a confident health verdict nor suggestions.
    Empty,
    Unrecognized,
}

impl Assessment {
    pub fn from_json(body: &Value) -> Self {
        let raw: RawResponse = match serde_json::from_value(body.clone()) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(error = %err, "classifier response did not match a known layout");
                return Self::Unrecognized;
            }
        };

        let (healthy, suggestions) = match (raw.result, raw.health_assessment) {
            (Some(current), _) => current.into_parts(),
            (None, Some(legacy)) => legacy.into_parts(),
            (None, None) => return Self::Unrecognized,
        };

        match healthy {
            Some(probability) if probability > HEALTHY_THRESHOLD => Self::Healthy { probability },
            _ if !suggestions.is_empty() => Self::DiseaseSuggestion { suggestions },
            _ => Self::Empty,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Healthy { .. } => "healthy",
            Self::DiseaseSuggestion { .. } => "disease_suggestion",
            Self::Empty => "empty",
            Self::Unrecognized => "unrecognized",
        }
    }

    pub fn into_diagnosis(self) -> Diagnosis {
        match self {
            Self::Healthy { probability } => Diagnosis {
                disease_name: HEALTHY_NAME.into(),
                confidence: to_percent(probability),
                description: HEALTHY_DESCRIPTION.into(),
                treatments: owned(&HEALTHY_TREATMENTS),
                prevention_methods: owned(&HEALTHY_PREVENTION),
            },
            Self::DiseaseSuggestion { suggestions } => from_suggestions(suggestions),
            Self::Empty | Self::Unrecognized => unknown(),
        }
    }
}

/// Reads any upstream body into a [`Diagnosis`].
pub fn normalize(body: &Value) -> Diagnosis {
    let assessment = Assessment::from_json(body);
    tracing::debug!(kind = assessment.kind(), "normalizing classifier response");
    assessment.into_diagnosis()
}

fn from_suggestions(suggestions: Vec<Suggestion>) -> Diagnosis {
    let chosen = match suggestions.iter().position(|s| !s.redundant) {
        Some(index) => suggestions.into_iter().nth(index),
        // every entry flagged redundant: the top-ranked one is still the best guess
        None => suggestions.into_iter().next(),
    };
    let Some(chosen) = chosen else {
        return unknown();
    };

    let treatments: Vec<String> = chosen
        .treatment
        .biological
        .iter()
        .take(MAX_BIOLOGICAL)
        .chain(chosen.treatment.chemical.iter().take(MAX_CHEMICAL))
        .cloned()
        .collect();
    let prevention: Vec<String> = chosen
        .treatment
        .prevention
        .iter()
        .take(MAX_PREVENTION)
        .cloned()
        .collect();

    Diagnosis {
        disease_name: non_blank(chosen.name).unwrap_or_else(|| UNKNOWN_DISEASE.into()),
        confidence: to_percent(chosen.probability),
        description: non_blank(chosen.description).unwrap_or_else(|| NO_DESCRIPTION.into()),
        treatments: or_fallback(treatments, &FALLBACK_TREATMENTS),
        prevention_methods: or_fallback(prevention, &FALLBACK_PREVENTION),
    }
}

fn unknown() -> Diagnosis {
    Diagnosis {
        disease_name: UNKNOWN_DISEASE.into(),
        confidence: 0,
        description: UNKNOWN_DESCRIPTION.into(),
        treatments: owned(&FALLBACK_TREATMENTS),
        prevention_methods: owned(&FALLBACK_PREVENTION),
    }
}

fn to_percent(probability: f64) -> u8 {
    (probability * 100.0).round().clamp(0.0, 100.0) as u8
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn or_fallback(items: Vec<String>, fallback: &[&str]) -> Vec<String> {
    if items.is_empty() {
        owned(fallback)
    } else {
        items
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// Wire layouts. Each field decodes on its own through `lenient`, so a
// missing, null or mistyped value degrades only that field.

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default, deserialize_with = "lenient")]
    result: Option<CurrentResult>,
    #[serde(default, deserialize_with = "lenient")]
    health_assessment: Option<LegacyAssessment>,
}

#[derive(Debug, Deserialize)]
struct CurrentResult {
    #[serde(default, deserialize_with = "lenient")]
    is_healthy: Option<HealthFlag>,
    #[serde(default, deserialize_with = "lenient")]
    disease: Option<DiseaseBlock>,
}

#[derive(Debug, Deserialize)]
struct HealthFlag {
    #[serde(default, deserialize_with = "lenient")]
    probability: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DiseaseBlock {
    #[serde(default, deserialize_with = "lenient")]
    suggestions: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct LegacyAssessment {
    #[serde(default, deserialize_with = "lenient")]
    is_healthy_probability: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    diseases: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct WireSuggestion {
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    probability: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    redundant: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    details: Option<WireDetails>,
    #[serde(default, deserialize_with = "lenient")]
    disease_details: Option<WireDetails>,
}

#[derive(Debug, Deserialize)]
struct WireDetails {
    #[serde(default, deserialize_with = "lenient")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    treatment: Option<WireTreatment>,
}

#[derive(Debug, Deserialize)]
struct WireTreatment {
    #[serde(default, deserialize_with = "lenient")]
    biological: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient")]
    chemical: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient")]
    prevention: Option<Vec<Value>>,
}

impl CurrentResult {
    fn into_parts(self) -> (Option<f64>, Vec<Suggestion>) {
        let healthy = self.is_healthy.and_then(|flag| flag.probability);
        let suggestions = self.disease.and_then(|block| block.suggestions);
        (healthy, decode_suggestions(suggestions))
    }
}

impl LegacyAssessment {
    fn into_parts(self) -> (Option<f64>, Vec<Suggestion>) {
        (self.is_healthy_probability, decode_suggestions(self.diseases))
    }
}

/// Decodes each entry separately; entries that are not objects are dropped.
fn decode_suggestions(entries: Option<Vec<Value>>) -> Vec<Suggestion> {
    entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<WireSuggestion>(entry).ok())
        .map(Suggestion::from)
        .collect()
}

impl From<WireSuggestion> for Suggestion {
    fn from(wire: WireSuggestion) -> Self {
        let details = wire.details.or(wire.disease_details);
        let (detail_description, treatment) = match details {
            Some(details) => (details.description, details.treatment),
            None => (None, None),
        };
        let treatment = treatment
            .map(|t| Treatment {
                biological: clean(t.biological),
                chemical: clean(t.chemical),
                prevention: clean(t.prevention),
            })
            .unwrap_or_default();

        Self {
            name: wire.name,
            probability: wire.probability.unwrap_or(0.0),
            redundant: wire.redundant.unwrap_or(false),
            description: non_blank(detail_description).or(wire.description),
            treatment,
        }
    }
}

/// Keeps the non-blank string entries of a treatment list.
fn clean(items: Option<Vec<Value>>) -> Vec<String> {
    items
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| match item {
            Value::String(text) if !text.trim().is_empty() => Some(text),
            _ => None,
        })
        .collect()
}
