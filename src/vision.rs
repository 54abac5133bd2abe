use std::future::Future;

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

use crate::{
    InspectorError, IResult, codec,
    config::{AiConfig, ApiConfig},
};

const ANALYSIS_PROMPT: &str = "As a civil engineer, I have some photos and would like to classify them into different categories before starting a project. Find if it contains any visible cracks, peeling paint, possible water damage, visual discoloration, honeycombing, spalling or any other possible damage. If nothing, then just mention one statement about the image. Sound it technical and to the point. Do not suggest any next steps, only one statement is suffice.";

const UPLOAD_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// Outcome of one classification call. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl Classification {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            comment: None,
            error: Some(error.into()),
            tokens: None,
            cost_usd: None,
        }
    }
}

/// Anything that turns image bytes into a finding.
pub trait Classifier {
    fn classify(&self, image_bytes: &[u8]) -> impl Future<Output = Classification> + Send;
}

/// Trims the model output and makes sure a non-empty finding ends with a period.
pub fn normalize_comment(raw: &str) -> String {
    let mut comment = raw.trim().to_string();
    if !comment.is_empty() && !comment.ends_with('.') {
        comment.push('.');
    }
    comment
}

/// Estimated USD cost of one call, rounded to 6 decimals.
pub fn estimate_cost(usage: TokenUsage, input_per_1k: f64, output_per_1k: f64) -> f64 {
    let cost = usage.input as f64 * input_per_1k / 1000.0
        + usage.output as f64 * output_per_1k / 1000.0;
    (cost * 1_000_000.0).round() / 1_000_000.0
}

fn extract_content(response: &serde_json::Value, compatible: bool) -> Option<&str> {
    if compatible {
        // OpenAI
        response
            .get("choices")
            .and_then(|choices| choices.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
    } else {
        // DashScope
        response
            .get("output")
            .and_then(|output| output.get("text"))
            .and_then(|text| text.as_str())
    }
}

fn extract_usage(response: &serde_json::Value, compatible: bool) -> TokenUsage {
    let (input_key, output_key) = if compatible {
        ("prompt_tokens", "completion_tokens")
    } else {
        ("input_tokens", "output_tokens")
    };
    let usage = response.get("usage");
    let count = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    TokenUsage {
        input: count(input_key),
        output: count(output_key),
    }
}

pub struct VisionClassifier {
    config: AiConfig,
    api: Option<ApiConfig>,
    client: reqwest::Client,
}

impl VisionClassifier {
    pub fn new(config: AiConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: AiConfig, client: reqwest::Client) -> Self {
        let api = config.api();
        Self {
            config,
            api,
            client,
        }
    }

    pub fn is_api_available(&self) -> bool {
        self.api.is_some()
    }

    /// Shrink and re-encode before upload so request size stays bounded.
    async fn encode_image_for_analysis(&self, image_bytes: &[u8]) -> IResult<String> {
        let max = self.config.max_image_dimension;
        let encoded =
            codec::resize_async(image_bytes.to_vec(), max, max, UPLOAD_JPEG_QUALITY).await?;
        debug!(
            "Encoded {}x{} JPEG ({} bytes) for analysis",
            encoded.width,
            encoded.height,
            encoded.bytes.len()
        );
        Ok(general_purpose::STANDARD.encode(&encoded.bytes))
    }

    fn build_request(&self, api_config: &ApiConfig, image_base64: &str) -> (serde_json::Value, String) {
        let data_url = format!("data:image/jpeg;base64,{}", image_base64);

        if api_config.use_compatible_mode {
            let payload = serde_json::json!({
                "model": api_config.model_name,
                "messages": [
                    {
                        "role": "user",
                        "content": [
                            { "type": "text", "text": ANALYSIS_PROMPT },
                            { "type": "image_url", "image_url": { "url": data_url } }
                        ]
                    }
                ],
                "max_tokens": self.config.max_tokens,
                "stream": false
            });
            let url = format!("{}/chat/completions", api_config.endpoint);
            (payload, url)
        } else {
            let payload = serde_json::json!({
                "model": api_config.model_name,
                "input": {
                    "messages": [
                        {
                            "role": "user",
                            "content": [
                                { "text": ANALYSIS_PROMPT },
                                { "image": data_url }
                            ]
                        }
                    ]
                },
                "parameters": {
                    "max_tokens": self.config.max_tokens
                }
            });
            let url = format!(
                "{}/services/aigc/text-generation/generation",
                api_config.endpoint.replace("/compatible-mode/v1", "")
            );
            (payload, url)
        }
    }

    async fn try_classify(&self, image_bytes: &[u8]) -> IResult<Classification> {
        let api_config = self
            .api
            .as_ref()
            .ok_or_else(|| InspectorError::AiError("API configuration not found".to_string()))?;

        let image_base64 = self.encode_image_for_analysis(image_bytes).await?;
        let (payload, url) = self.build_request(api_config, &image_base64);

        debug!("Sending request to remote API...");
        debug!("API URL: {}", url);
        debug!("Model: {}", api_config.model_name);

        let response = timeout(
            Duration::from_secs(self.config.timeout_seconds),
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_config.api_key))
                .header("Content-Type", "application/json")
                .json(&payload)
                .send(),
        )
        .await
        .map_err(|_| InspectorError::AiError("API request timeout".to_string()))?
        .map_err(|e| InspectorError::AiError(format!("API HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            debug!("Full API error response: {}", error_text);
            return Err(InspectorError::AiError(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InspectorError::AiError(format!("Failed to parse API response: {}", e)))?;

        let content = extract_content(&response_json, api_config.use_compatible_mode)
            .unwrap_or_else(|| {
                warn!("No content in API response");
                ""
            });
        let comment = normalize_comment(content);

        let usage = extract_usage(&response_json, api_config.use_compatible_mode);
        let cost_usd = estimate_cost(
            usage,
            api_config.input_cost_per_1k,
            api_config.output_cost_per_1k,
        );

        info!(
            "✅ Classified image: {} tokens in, {} out, ${:.6}",
            usage.input, usage.output, cost_usd
        );

        Ok(Classification {
            success: true,
            comment: Some(comment),
            error: None,
            tokens: Some(usage),
            cost_usd: Some(cost_usd),
        })
    }

    /// Classify one image. Any failure is folded into `success: false`.
    pub async fn classify_image(&self, image_bytes: &[u8]) -> Classification {
        match self.try_classify(image_bytes).await {
            Ok(result) => result,
            Err(e) => {
                error!("❌ Classification failed: {}", e);
                Classification::failure(e.to_string())
            }
        }
    }
}

impl Classifier for VisionClassifier {
    fn classify(&self, image_bytes: &[u8]) -> impl Future<Output = Classification> + Send {
        self.classify_image(image_bytes)
    }
}
