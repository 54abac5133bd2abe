pub mod analyze;
pub mod auth;
pub mod images;
pub mod reports;

use salvo::{
    Depot, Request, Response,
    http::{HeaderValue, StatusCode},
    writing::{Json, Scribe},
};
use tracing::{error, warn};

use crate::{AppState, InspectorError, IResult};

impl InspectorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            InspectorError::NotFound(_) => StatusCode::NOT_FOUND,
            InspectorError::InvalidRequest(_) | InspectorError::SerializationError(_) => {
                StatusCode::BAD_REQUEST
            }
            InspectorError::AuthError(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Scribe for InspectorError {
    fn render(self, res: &mut Response) {
        let status = self.status_code();
        if status.is_server_error() {
            error!("❌ {}", self);
        } else {
            warn!("{}", self);
        }
        res.status_code(status);
        res.render(Json(serde_json::json!({
            "success": false,
            "error": self.to_string()
        })));
    }
}

pub(crate) fn app_state(depot: &Depot) -> IResult<AppState> {
    depot
        .obtain::<AppState>()
        .cloned()
        .map_err(|_| InspectorError::ConfigError("Application state missing".to_string()))
}

pub(crate) fn path_param(req: &Request, name: &str) -> IResult<String> {
    req.param::<String>(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| InspectorError::InvalidRequest(format!("Missing path parameter: {}", name)))
}

pub(crate) async fn read_body(req: &mut Request, max_size: usize) -> IResult<Vec<u8>> {
    req.payload_with_max_size(max_size)
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|e| InspectorError::InvalidRequest(format!("Failed to read request body: {}", e)))
}

pub(crate) fn is_json(req: &Request) -> bool {
    req.headers()
        .get(salvo::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

pub(crate) fn header_value(value: &str) -> IResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| InspectorError::InvalidRequest(format!("Invalid header value: {}", e)))
}
