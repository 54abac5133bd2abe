//! Runtime configuration.
//!
//! Every option can be given as a command-line flag or through the
//! environment variable named next to it. `.env` is loaded in `main` before
//! parsing.
//!
//! ```text
//! AppConfig
//! ├── server: ServerConfig      # bind address, upload cap
//! ├── ai: AiConfig              # vision endpoint, model, pricing, timeout
//! ├── storage: StorageConfig    # memory | fs | s3, metadata retry
//! ├── auth: AuthConfig          # admin credentials, session lifetime
//! ├── analysis: AnalysisConfig  # batch pacing, job retention
//! └── report: ReportConfig      # document layout (not exposed as flags)
//! ```

use clap::{ArgAction, Args, Parser, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Parser, Serialize, Deserialize)]
#[command(name = "inspector")]
#[command(about = "Inspection photo store, damage classifier and report generator")]
#[command(version)]
pub struct AppConfig {
    #[clap(flatten)]
    pub server: ServerConfig,

    #[clap(flatten)]
    pub ai: AiConfig,

    #[clap(flatten)]
    pub storage: StorageConfig,

    #[clap(flatten)]
    pub auth: AuthConfig,

    #[clap(flatten)]
    pub analysis: AnalysisConfig,

    #[clap(skip)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[arg(long = "bind", env = "INSPECTOR_BIND", default_value = "0.0.0.0:5800")]
    pub bind: String,

    /// Maximum accepted request body for uploads and report requests, in MiB
    #[arg(long = "max-upload-mb", env = "INSPECTOR_MAX_UPLOAD_MB", default_value_t = 25)]
    pub max_upload_mb: usize,
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5800".to_string(),
            max_upload_mb: 25,
        }
    }
}

/// Resolved settings for one vision endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key for cloud service
    pub api_key: String,
    /// API endpoint
    pub endpoint: String,
    /// Model name for API analysis
    pub model_name: String,
    /// Use compatible mode (OpenAI format) or native DashScope format
    pub use_compatible_mode: bool,
    /// USD per 1000 prompt tokens
    pub input_cost_per_1k: f64,
    /// USD per 1000 completion tokens
    pub output_cost_per_1k: f64,
}

impl ApiConfig {
    pub fn with_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: "https://api.openai.com/v1".to_string(),
            model_name: "gpt-4o".to_string(),
            use_compatible_mode: true,
            input_cost_per_1k: 0.005,
            output_cost_per_1k: 0.015,
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct AiConfig {
    /// API key for the vision endpoint; analysis reports failures without it
    #[arg(long = "openai-api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the vision endpoint
    #[arg(long = "vision-endpoint", env = "VISION_ENDPOINT", default_value = "https://api.openai.com/v1")]
    pub endpoint: String,

    /// Model name sent with every request
    #[arg(long = "vision-model", env = "VISION_MODEL", default_value = "gpt-4o")]
    pub model_name: String,

    /// OpenAI wire format when true, native DashScope format when false
    #[arg(
        long = "vision-compatible-mode",
        env = "VISION_COMPATIBLE_MODE",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub use_compatible_mode: bool,

    /// USD per 1000 prompt tokens
    #[arg(long = "vision-input-cost", env = "VISION_INPUT_COST_PER_1K", default_value_t = 0.005)]
    pub input_cost_per_1k: f64,

    /// USD per 1000 completion tokens
    #[arg(long = "vision-output-cost", env = "VISION_OUTPUT_COST_PER_1K", default_value_t = 0.015)]
    pub output_cost_per_1k: f64,

    /// Cap on generated tokens per request
    #[arg(long = "vision-max-tokens", env = "VISION_MAX_TOKENS", default_value_t = 300)]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[arg(long = "vision-timeout-seconds", env = "VISION_TIMEOUT_SECONDS", default_value_t = 120)]
    pub timeout_seconds: u64,

    /// Longest edge of the image sent to the model
    #[arg(skip = 1200u32)]
    pub max_image_dimension: u32,
}

impl AiConfig {
    /// Endpoint settings, present only when an API key is configured.
    pub fn api(&self) -> Option<ApiConfig> {
        let api_key = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
        Some(ApiConfig {
            api_key: api_key.to_string(),
            endpoint: self.endpoint.trim_end_matches('/').to_string(),
            model_name: self.model_name.clone(),
            use_compatible_mode: self.use_compatible_mode,
            input_cost_per_1k: self.input_cost_per_1k,
            output_cost_per_1k: self.output_cost_per_1k,
        })
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        let defaults = ApiConfig::with_key("");
        Self {
            api_key: None,
            endpoint: defaults.endpoint,
            model_name: defaults.model_name,
            use_compatible_mode: defaults.use_compatible_mode,
            input_cost_per_1k: defaults.input_cost_per_1k,
            output_cost_per_1k: defaults.output_cost_per_1k,
            max_tokens: 300,
            timeout_seconds: 120,
            max_image_dimension: 1200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Fs,
    S3,
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object store backing images and metadata
    #[arg(
        long = "storage-backend",
        env = "STORAGE_BACKEND",
        value_enum,
        ignore_case = true,
        default_value_t = StorageBackend::Memory
    )]
    pub backend: StorageBackend,

    /// Directory for `fs`, key prefix for `s3`
    #[arg(long = "storage-root", env = "STORAGE_ROOT", default_value = "/inspector")]
    pub root: String,

    #[arg(long = "s3-bucket", env = "S3_BUCKET")]
    pub bucket: Option<String>,

    #[arg(long = "s3-region", env = "S3_REGION")]
    pub region: Option<String>,

    #[arg(id = "s3_endpoint", long = "s3-endpoint", env = "S3_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long = "s3-access-key-id", env = "S3_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long = "s3-secret-access-key", env = "S3_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// Attempts for a metadata write that follows an upload
    #[arg(long = "metadata-retries", env = "METADATA_RETRIES", default_value_t = 3)]
    pub metadata_retries: u32,

    /// Backoff unit between those attempts, multiplied by the attempt number
    #[arg(long = "metadata-backoff-ms", env = "METADATA_BACKOFF_MS", default_value_t = 500)]
    pub metadata_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            root: "/inspector".to_string(),
            bucket: None,
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            metadata_retries: 3,
            metadata_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct AuthConfig {
    #[arg(long = "admin-user", env = "ADMIN_USER")]
    pub username: Option<String>,

    #[arg(long = "admin-pass", env = "ADMIN_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Session lifetime
    #[arg(long = "session-hours", env = "SESSION_HOURS", default_value_t = 8)]
    pub session_hours: i64,

    /// Marks the session cookie `Secure`
    #[arg(
        long = "secure-cookies",
        env = "SECURE_COOKIES",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub secure_cookie: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            session_hours: 8,
            secure_cookie: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Images per document section
    pub batch_size: usize,
    pub images_per_page: usize,
    /// Bound on both embedded image dimensions, in pixels
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    /// Display width cap at 96 DPI
    pub max_width_cm: f64,
    /// Largest accepted report request
    pub max_images: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            images_per_page: 2,
            max_dimension: 1200,
            jpeg_quality: 85,
            max_width_cm: 15.0,
            max_images: 1000,
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Pause between two classification calls, in seconds
    #[arg(long = "analysis-rate-seconds", env = "ANALYSIS_RATE_SECONDS", default_value_t = 1.0)]
    pub default_rate_seconds: f64,

    /// How long a stopped or completed batch stays queryable, in minutes
    #[arg(
        long = "job-retention-minutes",
        env = "ANALYSIS_JOB_RETENTION_MINUTES",
        default_value_t = 60
    )]
    pub job_retention_minutes: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_rate_seconds: 1.0,
            job_retention_minutes: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        AppConfig::command().debug_assert();
    }

    #[test]
    fn defaults_match_report_layout() {
        let config = AppConfig::default();
        assert_eq!(config.report.batch_size, 20);
        assert_eq!(config.report.images_per_page, 2);
        assert_eq!(config.report.max_dimension, 1200);
        assert_eq!(config.report.max_images, 1000);
        assert_eq!(config.auth.session_hours, 8);
        assert!(config.ai.api().is_none());
    }

    #[test]
    fn parsed_defaults_agree_with_default_impls() {
        let parsed = AppConfig::try_parse_from(["inspector"]).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(parsed.server.max_upload_mb, defaults.server.max_upload_mb);
        assert_eq!(parsed.server.max_upload_bytes(), 25 * 1024 * 1024);
        assert_eq!(parsed.ai.max_tokens, defaults.ai.max_tokens);
        assert_eq!(parsed.ai.timeout_seconds, defaults.ai.timeout_seconds);
        assert_eq!(parsed.ai.max_image_dimension, 1200);
        assert_eq!(parsed.storage.metadata_retries, defaults.storage.metadata_retries);
        assert_eq!(parsed.analysis.job_retention_minutes, 60);
        assert_eq!(parsed.report.batch_size, 20);
    }

    #[test]
    fn flags_override_defaults() {
        let config = AppConfig::try_parse_from([
            "inspector",
            "--storage-backend",
            "S3",
            "--s3-bucket",
            "site-photos",
            "--session-hours",
            "4",
            "--secure-cookies",
            "true",
            "--vision-compatible-mode",
            "false",
            "--vision-endpoint",
            "https://dashscope.example.com/compatible-mode/v1/",
            "--openai-api-key",
            "sk-test",
        ])
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.bucket.as_deref(), Some("site-photos"));
        assert_eq!(config.auth.session_hours, 4);
        assert!(config.auth.secure_cookie);

        let api = config.ai.api().unwrap();
        assert_eq!(api.api_key, "sk-test");
        assert!(!api.use_compatible_mode);
        assert_eq!(api.endpoint, "https://dashscope.example.com/compatible-mode/v1");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(AppConfig::try_parse_from(["inspector", "--storage-backend", "ftp"]).is_err());
        assert!(AppConfig::try_parse_from(["inspector", "--session-hours", "eight"]).is_err());
    }

    #[test]
    fn blank_api_key_means_no_endpoint() {
        let config = AiConfig {
            api_key: Some("  ".to_string()),
            ..AiConfig::default()
        };
        assert!(config.api().is_none());
    }

    #[test]
    fn api_config_uses_published_rates() {
        let api = ApiConfig::with_key("sk-test");
        assert_eq!(api.input_cost_per_1k, 0.005);
        assert_eq!(api.output_cost_per_1k, 0.015);
        assert!(api.use_compatible_mode);
    }
}
