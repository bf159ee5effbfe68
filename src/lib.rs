//! Plant disease diagnosis and crop recommendation service.
//!
//! Uploads are normalized to a bounded JPEG, sent to an external plant
//! health API (trying each configured credential in order), and the answer
//! is reshaped into a fixed result that is kept in an in-memory store.
//! Crop recommendations are scored by an external command.

pub mod assessment;
pub mod classifier;
pub mod config;
pub mod error;
pub mod logging;
pub mod preprocess;
pub mod recommend;
pub mod routes;
pub mod store;

use classifier::{ClassificationClient, ClassifierError};
use config::Config;
use recommend::ProcessScorer;
use store::RecordStore;

pub use routes::{router, SharedState};

/// Everything a request handler needs. Built once at startup.
pub struct AppState {
    pub config: Config,
    pub store: RecordStore,
    pub classifier: ClassificationClient,
    pub scorer: Option<ProcessScorer>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ClassifierError> {
        let classifier = ClassificationClient::new(
            config.classifier_endpoint.clone(),
            config.classifier_credentials.clone(),
            config.classifier_timeout,
        )?;
        let scorer = config
            .scorer
            .clone()
            .map(|command| ProcessScorer::new(command, config.scorer_timeout));

        Ok(Self {
            config,
            store: RecordStore::new(),
            classifier,
            scorer,
        })
    }
}
