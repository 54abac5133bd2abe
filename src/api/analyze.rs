use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use salvo::{Depot, Request, Response, handler, http::StatusCode, writing::Json};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    InspectorError, IResult,
    analysis::{BatchAnalysis, BatchItem, persist_progress, rate_duration},
    api::{app_state, path_param, read_body},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest {
    image_ids: Vec<String>,
    #[serde(default)]
    rate_seconds: Option<f64>,
}

/// Accepts plain base64 as well as a `data:` URL.
fn decode_image_field(field: &str) -> IResult<Vec<u8>> {
    let encoded = match field.split_once("base64,") {
        Some((_, data)) => data,
        None => field,
    };
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| InspectorError::InvalidRequest(format!("Invalid base64 image: {}", e)))
}

fn job_id(req: &Request) -> IResult<Uuid> {
    let raw = path_param(req, "job")?;
    Uuid::parse_str(&raw)
        .map_err(|_| InspectorError::InvalidRequest(format!("Invalid job id: {}", raw)))
}

/// Classifies one image sent as form field `imageBase64`.
/// POST /api/analyze
#[handler]
pub async fn single(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let field = req
        .form::<String>("imageBase64")
        .await
        .ok_or_else(|| InspectorError::InvalidRequest("No image provided".to_string()))?;
    let bytes = decode_image_field(&field)?;

    let result = state.classifier.classify_image(&bytes).await;
    if !result.success {
        res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
    }
    res.render(Json(result));
    Ok(())
}

/// Starts a server-side batch over stored images and returns its job id.
/// POST /api/analyze/batch
#[handler]
pub async fn start_batch(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let body = read_body(req, state.config.server.max_upload_bytes()).await?;
    let request: BatchRequest = serde_json::from_slice(&body)?;

    if request.image_ids.is_empty() {
        return Err(InspectorError::InvalidRequest("No images provided".to_string()));
    }

    let rate = rate_duration(
        request
            .rate_seconds
            .unwrap_or(state.config.analysis.default_rate_seconds),
    );
    let items: Vec<BatchItem> = request
        .image_ids
        .into_iter()
        .map(|id| BatchItem::new(id.clone(), id))
        .collect();

    let job = Arc::new(BatchAnalysis::new());
    let job_id = state.jobs.insert(job.clone()).await;
    info!("🚀 Batch {} queued with {} images", job_id, items.len());

    let classifier = state.classifier.clone();
    let store = state.store.clone();
    tokio::spawn(async move {
        let (report, written) = tokio::join!(
            job.run(classifier.as_ref(), &store, items, rate),
            persist_progress(&store, &job)
        );
        if report.stopped {
            warn!("Batch {} stopped after {} images", job_id, report.processed);
        }
        info!(
            "Batch {} finished: {}/{} processed, {} comments stored, ${:.6}",
            job_id, report.processed, report.total, written, report.total_cost_usd
        );
    });

    res.render(Json(serde_json::json!({ "jobId": job_id })));
    Ok(())
}

/// GET /api/analyze/batch/{job}
#[handler]
pub async fn batch_status(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let id = job_id(req)?;
    let job = state
        .jobs
        .get(&id)
        .await
        .ok_or_else(|| InspectorError::NotFound(format!("Batch {} not found", id)))?;

    res.render(Json(job.status()));
    Ok(())
}

/// POST /api/analyze/batch/{job}/stop
#[handler]
pub async fn stop_batch(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let id = job_id(req)?;
    let job = state
        .jobs
        .get(&id)
        .await
        .ok_or_else(|| InspectorError::NotFound(format!("Batch {} not found", id)))?;

    job.stop();
    info!("⏹️ Stop requested for batch {}", id);
    res.render(Json(serde_json::json!({ "success": true, "jobId": id })));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_field_accepts_data_urls() {
        assert_eq!(decode_image_field("QUJD").unwrap(), b"ABC");
        assert_eq!(decode_image_field("data:image/png;base64,QUJD").unwrap(), b"ABC");
        assert!(matches!(
            decode_image_field("%%%"),
            Err(InspectorError::InvalidRequest(_))
        ));
    }
}
