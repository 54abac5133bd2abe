use salvo::{
    Depot, Request, Response, handler,
    writing::{Json, Redirect},
};
use serde::Deserialize;
use tracing::info;

use crate::{
    InspectorError, IResult,
    api::{app_state, is_json, read_body},
    auth::{LOGIN_PATH, SESSION_COOKIE, check_credentials, expired_cookie, session_cookie},
};

const MAX_LOGIN_BODY: usize = 16 * 1024;

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn read_login(req: &mut Request) -> IResult<LoginRequest> {
    if is_json(req) {
        let body = read_body(req, MAX_LOGIN_BODY).await?;
        return Ok(serde_json::from_slice(&body)?);
    }

    let email = req.form::<String>("email").await;
    let password = req.form::<String>("password").await;
    match (email, password) {
        (Some(email), Some(password)) => Ok(LoginRequest { email, password }),
        _ => Err(InspectorError::InvalidRequest(
            "Email and password are required".to_string(),
        )),
    }
}

/// POST /api/auth/login
#[handler]
pub async fn login(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    let credentials = read_login(req).await?;

    check_credentials(&state.config.auth, &credentials.email, &credentials.password)?;

    let token = state.sessions.create().await;
    let cookie = session_cookie(
        &token,
        state.sessions.max_age_seconds(),
        state.config.auth.secure_cookie,
    );
    res.add_cookie(cookie);
    info!("🔑 Operator signed in");

    res.render(Json(serde_json::json!({ "success": true })));
    Ok(())
}

/// POST /api/auth/logout
#[handler]
pub async fn logout(req: &mut Request, depot: &mut Depot, res: &mut Response) -> IResult<()> {
    let state = app_state(depot)?;
    if let Some(token) = req.cookie(SESSION_COOKIE).map(|c| c.value().to_string()) {
        state.sessions.revoke(&token).await;
    }

    res.add_cookie(expired_cookie(state.config.auth.secure_cookie));
    res.render(Redirect::found(LOGIN_PATH));
    Ok(())
}
