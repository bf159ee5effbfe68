//! Crop recommendation from soil and climate readings.
//!
//! Readings are range checked here, then handed to an external scoring
//! command as seven positional arguments (`N P K temperature humidity ph
//! rainfall`). The command prints a single JSON object on stdout.

use std::{process::Stdio, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

use crate::config::ScorerCommand;

struct Bound {
    field: &'static str,
    min: f64,
    max: f64,
    unit: &'static str,
}

const BOUNDS: [Bound; 7] = [
    Bound { field: "nitrogen", min: 0.0, max: 200.0, unit: " kg/ha" },
    Bound { field: "phosphorus", min: 0.0, max: 150.0, unit: " kg/ha" },
    Bound { field: "potassium", min: 0.0, max: 200.0, unit: " kg/ha" },
    Bound { field: "temperature", min: 0.0, max: 50.0, unit: "°C" },
    Bound { field: "humidity", min: 0.0, max: 100.0, unit: "%" },
    Bound { field: "ph", min: 0.0, max: 14.0, unit: "" },
    Bound { field: "rainfall", min: 0.0, max: 500.0, unit: " mm" },
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoilReadings {
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub ph: f64,
    pub rainfall: f64,
}

#[derive(Debug, Error)]
#[error("{}", .violations.join("; "))]
pub struct ValidationError {
    pub violations: Vec<String>,
}

impl SoilReadings {
    fn values(&self) -> [f64; 7] {
        [
            self.nitrogen,
            self.phosphorus,
            self.potassium,
            self.temperature,
            self.humidity,
            self.ph,
            self.rainfall,
        ]
    }

    /// Checks every reading against its documented range, bounds inclusive.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let violations: Vec<String> = BOUNDS
            .iter()
            .zip(self.values())
            .filter(|(bound, value)| !(bound.min..=bound.max).contains(value))
            .map(|(bound, value)| {
                format!(
                    "{} must be between {}{unit} and {}{unit} (got {value})",
                    bound.field,
                    bound.min,
                    bound.max,
                    unit = bound.unit
                )
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    fn as_args(&self) -> Vec<String> {
        self.values().iter().map(f64::to_string).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CropInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growing_season: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil_requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropPrediction {
    pub predicted_crop: String,
    pub confidence: f64,
    pub top_predictions: Vec<(String, f64)>,
    pub feature_importance: Vec<(String, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_info: Option<CropInfo>,
}

/// The stored shape: the readings that were scored plus the verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropRecommendation {
    #[serde(flatten)]
    pub readings: SoilReadings,
    #[serde(flatten)]
    pub prediction: CropPrediction,
}

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Failed to start scorer {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("Scorer did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Scorer exited with {status}: {message}")]
    Failed { status: String, message: String },
    #[error("Scorer reported an error: {0}")]
    Rejected(String),
    #[error("Scorer output could not be parsed: {0}")]
    Unparseable(String),
}

#[derive(Debug, Deserialize)]
struct ScorerOutput {
    success: Option<bool>,
    error: Option<String>,
    predicted_crop: Option<String>,
    confidence: Option<f64>,
    top_predictions: Option<Vec<(String, f64)>>,
    feature_importance: Option<Vec<(String, f64)>>,
    crop_info: Option<CropInfo>,
}

/// Runs the configured scoring command once per request. No retries.
#[derive(Debug, Clone)]
pub struct ProcessScorer {
    command: ScorerCommand,
    timeout: Duration,
}

impl ProcessScorer {
    pub fn new(command: ScorerCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub async fn score(&self, readings: &SoilReadings) -> Result<CropPrediction, PredictionError> {
        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .args(readings.as_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PredictionError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PredictionError::Timeout(self.timeout))?
            .map_err(|source| PredictionError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed = last_json_line(&stdout);

        if !output.status.success() {
            let message = parsed
                .ok()
                .and_then(|out| out.error)
                .unwrap_or_else(|| String::from_utf8_lossy(&output.stderr).trim().to_string());
            return Err(PredictionError::Failed {
                status: output.status.to_string(),
                message,
            });
        }

        let out = parsed?;
        if out.success == Some(false) || out.error.is_some() {
            return Err(PredictionError::Rejected(
                out.error.unwrap_or_else(|| "unspecified".into()),
            ));
        }

        let predicted_crop = out
            .predicted_crop
            .filter(|crop| !crop.trim().is_empty())
            .ok_or_else(|| PredictionError::Unparseable("missing predicted_crop".into()))?;
        let confidence = out
            .confidence
            .ok_or_else(|| PredictionError::Unparseable("missing confidence".into()))?;

        Ok(CropPrediction {
            predicted_crop,
            confidence,
            top_predictions: out.top_predictions.unwrap_or_default(),
            feature_importance: out.feature_importance.unwrap_or_default(),
            crop_info: out.crop_info,
        })
    }
}

fn last_json_line(stdout: &str) -> Result<ScorerOutput, PredictionError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .ok_or_else(|| PredictionError::Unparseable("empty output".into()))?;
    serde_json::from_str(line).map_err(|err| PredictionError::Unparseable(err.to_string()))
}
