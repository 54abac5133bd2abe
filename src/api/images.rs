use salvo::{
    Depot, Request, Response, handler,
    http::{
        HeaderValue,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    writing::Json,
};
use serde::Deserialize;
use tracing::info;

use crate::{
    InspectorError, IResult,
    api::{app_state, is_json, path_param, read_body},
    codec,
    model::{AnnotationBox, ImageMetadata},
    storage::annotated_key,
};

#[derive(Debug, Deserialize)]
struct AnnotateRequest {
    annotations: Vec<AnnotationBox>,
}

/// Stores raw image bytes, or the metadata document when the body is JSON.
/// POST|PUT /api/images/{id}
#[handler]
pub async fn upload(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let id = path_param(req, "id")?;
    let json = is_json(req);
    let body = read_body(req, state.config.server.max_upload_bytes()).await?;

    if json {
        let document: ImageMetadata = serde_json::from_slice(&body)?;
        state.store.store_metadata_after_upload(&id, &document).await?;
        info!("📝 Stored metadata for {}", id);
    } else {
        if body.is_empty() {
            return Err(InspectorError::InvalidRequest("Empty image body".to_string()));
        }
        let size = body.len();
        state.store.put(&id, body).await?;
        info!("📤 Stored image {} ({} bytes)", id, size);
    }

    res.render(Json(serde_json::json!({ "success": true, "id": id })));
    Ok(())
}

/// GET /api/images/{id}
#[handler]
pub async fn fetch(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let id = path_param(req, "id")?;

    let bytes = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| InspectorError::NotFound(format!("Image {} not found", id)))?;

    let headers = res.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(codec::content_type(&bytes)),
    );
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );
    res.body(bytes);
    Ok(())
}

/// DELETE /api/images/{id}
#[handler]
pub async fn remove(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let id = path_param(req, "id")?;

    let failures = state.store.delete_image(&id).await;
    res.render(Json(serde_json::json!({
        "success": failures == 0,
        "id": id
    })));
    Ok(())
}

/// GET /api/images/{id}/metadata
#[handler]
pub async fn metadata_info(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let id = path_param(req, "id")?;

    let stored = state.store.get_meta(&id).await?;
    let comment_length = stored
        .as_ref()
        .map(|m| m.comment.chars().count())
        .unwrap_or(0);

    res.render(Json(serde_json::json!({
        "id": id,
        "hasMetadata": stored.is_some(),
        "hasComment": comment_length > 0,
        "commentLength": comment_length,
        "metadata": stored,
    })));
    Ok(())
}

/// Renders the boxes onto the stored original and keeps the result as `<id>_annotated`.
/// POST /api/images/{id}/annotated
#[handler]
pub async fn annotate(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let id = path_param(req, "id")?;
    let body = read_body(req, state.config.server.max_upload_bytes()).await?;
    let request: AnnotateRequest = serde_json::from_slice(&body)?;

    let original = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| InspectorError::NotFound(format!("Original image {} not found", id)))?;

    let box_count = request.annotations.len();
    let annotated = codec::overlay_async(original, request.annotations).await?;
    state.store.put_annotated(&id, annotated).await?;
    info!("🖍️ Saved annotated variant of {} ({} boxes)", id, box_count);

    res.render(Json(serde_json::json!({
        "success": true,
        "annotatedId": annotated_key(&id)
    })));
    Ok(())
}

/// DELETE /api/images/cleanup
#[handler]
pub async fn cleanup(depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let summary = state.store.delete_all().await?;
    info!(
        "🧹 Cleanup removed {} images ({} errors)",
        summary.deleted, summary.errors
    );

    res.render(Json(serde_json::json!({
        "success": true,
        "deleted": summary.deleted,
        "errors": summary.errors,
        "message": format!("Deleted {} images", summary.deleted)
    })));
    Ok(())
}
