use chrono::Local;
use salvo::{
    Depot, Request, Response, handler,
    http::{
        HeaderValue,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
    },
};

use crate::{
    IResult,
    api::{app_state, header_value, path_param, read_body},
    report::{ReportRequest, ReportVariant},
};

const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// POST /api/reports/{variant}
#[handler]
pub async fn generate(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let variant: ReportVariant = path_param(req, "variant")?.parse()?;
    let body = read_body(req, state.config.server.max_upload_bytes()).await?;

    let request: ReportRequest = serde_json::from_slice(&body)?;
    let items = request.into_items(state.reports.config().max_images)?;

    let document = state.reports.build(&items, variant).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        variant.file_name(Local::now().date_naive())
    );

    let headers = res.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(DOCX_CONTENT_TYPE));
    headers.insert(CONTENT_DISPOSITION, header_value(&disposition)?);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    res.body(document);
    Ok(())
}
