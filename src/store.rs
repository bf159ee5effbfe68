use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::assessment::Diagnosis;
use crate::recommend::CropRecommendation;

pub type RecordId = u64;

/// A stored value together with the id and timestamp assigned at creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record<T> {
    pub id: RecordId,
    #[serde(flatten)]
    pub data: T,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiseaseAnalysis {
    pub image_path: String,
    pub disease_name: String,
    pub confidence: u8,
    pub description: String,
    pub treatments: Option<Vec<String>>,
    pub prevention_methods: Option<Vec<String>>,
}

impl DiseaseAnalysis {
    pub fn from_diagnosis(image_path: impl Into<String>, diagnosis: Diagnosis) -> Self {
        Self {
            image_path: image_path.into(),
            disease_name: diagnosis.disease_name,
            confidence: diagnosis.confidence,
            description: diagnosis.description,
            treatments: Some(diagnosis.treatments),
            prevention_methods: Some(diagnosis.prevention_methods),
        }
    }
}

#[derive(Debug)]
struct Table<T> {
    next_id: RecordId,
    rows: HashMap<RecordId, Record<T>>,
}

impl<T: Clone> Table<T> {
    fn new() -> Self {
        Self {
            next_id: 1,
            rows: HashMap::new(),
        }
    }

    fn insert(&mut self, data: T) -> Record<T> {
        let record = Record {
            id: self.next_id,
            data,
            created_at: Utc::now(),
        };
        self.next_id += 1;
        self.rows.insert(record.id, record.clone());
        record
    }

    fn get(&self, id: RecordId) -> Option<Record<T>> {
        self.rows.get(&id).cloned()
    }
}

/// Volatile, append-only storage for produced results.
///
/// Each table owns its own id counter, starting at 1. Id assignment and
/// insertion happen under one lock, which is never held across I/O.
#[derive(Debug)]
pub struct RecordStore {
    analyses: Mutex<Table<DiseaseAnalysis>>,
    recommendations: Mutex<Table<CropRecommendation>>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            analyses: Mutex::new(Table::new()),
            recommendations: Mutex::new(Table::new()),
        }
    }

    pub async fn create_disease_analysis(&self, analysis: DiseaseAnalysis) -> Record<DiseaseAnalysis> {
        self.analyses.lock().await.insert(analysis)
    }

    pub async fn get_disease_analysis(&self, id: RecordId) -> Option<Record<DiseaseAnalysis>> {
        self.analyses.lock().await.get(id)
    }

    pub async fn create_crop_recommendation(
        &self,
        recommendation: CropRecommendation,
    ) -> Record<CropRecommendation> {
        self.recommendations.lock().await.insert(recommendation)
    }

    pub async fn get_crop_recommendation(&self, id: RecordId) -> Option<Record<CropRecommendation>> {
        self.recommendations.lock().await.get(id)
    }
}
