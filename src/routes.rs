use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        State,
    },
    routing::{get, post},
    Json, Router,
};
use image::ImageFormat;
use serde::Serialize;
use serde_json::json;
use tracing::instrument;

use crate::{
    assessment::{self, Diagnosis},
    error::ApiError,
    preprocess::{self, NormalizedImage},
    recommend::{CropPrediction, CropRecommendation, SoilReadings},
    store::{DiseaseAnalysis, Record, RecordId},
    AppState,
};

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    let body_limit = state.config.body_limit_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/api/detect-disease", post(detect_disease))
        .route("/api/crop-recommendations", post(crop_recommendations))
        .route("/api/disease-analysis/:id", get(get_disease_analysis))
        .route("/api/crop-recommendation/:id", get(get_crop_recommendation))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .route("/health", get(health_check))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectionResponse {
    id: RecordId,
    disease_name: String,
    confidence: u8,
    description: String,
    treatments: Vec<String>,
    prevention_methods: Vec<String>,
}

impl From<&Record<DiseaseAnalysis>> for DetectionResponse {
    fn from(record: &Record<DiseaseAnalysis>) -> Self {
        let analysis = &record.data;
        Self {
            id: record.id,
            disease_name: analysis.disease_name.clone(),
            confidence: analysis.confidence,
            description: analysis.description.clone(),
            treatments: analysis.treatments.clone().unwrap_or_default(),
            prevention_methods: analysis.prevention_methods.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RecommendationResponse {
    id: RecordId,
    #[serde(flatten)]
    prediction: CropPrediction,
}

#[instrument(skip_all)]
async fn detect_disease(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionResponse>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let (upload, format) = read_image_field(&mut multipart, state.config.body_limit_bytes)
        .await?
        .ok_or_else(|| ApiError::BadRequest("No image file uploaded".into()))?;

    let normalized =
        preprocess::normalize_upload_blocking(state.config.upload_dir.clone(), upload, format)
            .await?;
    let image_path = normalized.processed_path().display().to_string();

    let outcome = diagnose(&state, &normalized).await;
    normalized.cleanup();
    let diagnosis = outcome?;

    let record = state
        .store
        .create_disease_analysis(DiseaseAnalysis::from_diagnosis(image_path, diagnosis))
        .await;
    tracing::info!(
        id = record.id,
        disease = %record.data.disease_name,
        confidence = record.data.confidence,
        "disease analysis stored"
    );

    Ok(Json(DetectionResponse::from(&record)))
}

async fn diagnose(state: &AppState, image: &NormalizedImage) -> Result<Diagnosis, ApiError> {
    let (width, height) = image.dimensions();
    tracing::debug!(width, height, bytes = image.jpeg_bytes().len(), "submitting image");
    let body = state.classifier.assess(image.jpeg_bytes()).await?;
    Ok(assessment::normalize(&body))
}

/// Pulls the `image` part out of the form, enforcing type and size limits.
async fn read_image_field(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<Option<(Vec<u8>, ImageFormat)>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("Failed to read upload: {err}")))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let content_type = field.content_type().map(str::to_owned);
        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::BadRequest(format!("Failed to read image: {err}")))?;

        if data.is_empty() {
            return Ok(None);
        }
        if data.len() > max_bytes {
            return Err(ApiError::BadRequest(format!(
                "Image too large. Max size is {max_bytes} bytes"
            )));
        }
        let format = preprocess::accepted_format(content_type.as_deref(), &data)
            .ok_or_else(|| ApiError::BadRequest("Only JPG and PNG files are allowed".into()))?;
        return Ok(Some((data.to_vec(), format)));
    }
    Ok(None)
}

#[instrument(skip_all)]
async fn crop_recommendations(
    State(state): State<SharedState>,
    payload: Result<Json<SoilReadings>, JsonRejection>,
) -> Result<Json<RecommendationResponse>, ApiError> {
    let Json(readings) = payload.map_err(|rejection| ApiError::Validation(vec![rejection.body_text()]))?;
    readings.validate()?;

    let scorer = state.scorer.as_ref().ok_or(ApiError::FeatureDisabled)?;
    let prediction = scorer.score(&readings).await?;

    let record = state
        .store
        .create_crop_recommendation(CropRecommendation {
            readings,
            prediction,
        })
        .await;
    tracing::info!(
        id = record.id,
        crop = %record.data.prediction.predicted_crop,
        confidence = record.data.prediction.confidence,
        "crop recommendation stored"
    );

    Ok(Json(RecommendationResponse {
        id: record.id,
        prediction: record.data.prediction,
    }))
}

async fn get_disease_analysis(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Record<DiseaseAnalysis>>, ApiError> {
    const WHAT: &str = "Disease analysis";
    let id = parse_id(&id).ok_or(ApiError::NotFound(WHAT))?;
    state
        .store
        .get_disease_analysis(id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound(WHAT))
}

async fn get_crop_recommendation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Record<CropRecommendation>>, ApiError> {
    const WHAT: &str = "Crop recommendation";
    let id = parse_id(&id).ok_or(ApiError::NotFound(WHAT))?;
    state
        .store
        .get_crop_recommendation(id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound(WHAT))
}

fn parse_id(raw: &str) -> Option<RecordId> {
    raw.parse().ok()
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK" }))
}
