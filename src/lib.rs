pub mod analysis;
pub mod api;
pub mod auth;
pub mod codec;
pub mod config;
mod docx;
pub mod model;
pub mod report;
pub mod router;
pub mod storage;
pub mod vision;

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    analysis::AnalysisJobs, auth::SessionStore, config::AppConfig, report::ReportBuilder,
    storage::AssetStore, vision::VisionClassifier,
};

pub type IResult<T> = std::result::Result<T, InspectorError>;

#[derive(Error, Debug)]
pub enum InspectorError {
    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("AI analysis error: {0}")]
    AiError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] opendal::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Report generation error: {0}")]
    ReportError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Shared handles injected into every request through the router's depot.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: AssetStore,
    pub classifier: Arc<VisionClassifier>,
    pub reports: ReportBuilder,
    pub jobs: AnalysisJobs,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: AppConfig) -> IResult<Self> {
        let store = AssetStore::new(&config.storage)?;
        let classifier = Arc::new(VisionClassifier::new(config.ai.clone()));
        let reports = ReportBuilder::new(store.clone(), config.report.clone());
        let sessions = SessionStore::new(config.auth.session_hours);
        let jobs = AnalysisJobs::new(Duration::from_secs(
            config.analysis.job_retention_minutes * 60,
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            classifier,
            reports,
            jobs,
            sessions,
        })
    }
}
