//! Single-operator login and the session cookie gate.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use salvo::{
    Depot, FlowCtrl, Request, Response, handler,
    http::cookie::{Cookie, SameSite, time},
    writing::Redirect,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{AppState, InspectorError, IResult, config::AuthConfig};

pub const SESSION_COOKIE: &str = "inspector_session";
pub const LOGIN_PATH: &str = "/login";

/// Compares submitted credentials with the configured operator account.
pub fn check_credentials(config: &AuthConfig, email: &str, password: &str) -> IResult<()> {
    let (Some(username), Some(expected)) = (&config.username, &config.password) else {
        return Err(InspectorError::ConfigError(
            "Admin credentials are not configured".to_string(),
        ));
    };

    // Both sides are always compared so a mismatch takes the same time.
    let user_ok = constant_time_eq(username.as_bytes(), email.as_bytes());
    let pass_ok = constant_time_eq(expected.as_bytes(), password.as_bytes());
    if user_ok & pass_ok {
        Ok(())
    } else {
        Err(InspectorError::AuthError("Invalid credentials".to_string()))
    }
}

/// Equality whose running time depends on the lengths only, not on where
/// the inputs first differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let longest = a.len().max(b.len());
    let mut diff = a.len() ^ b.len();
    for i in 0..longest {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

/// Session cookie carrying a fresh token.
pub fn session_cookie(token: &str, max_age_seconds: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age_seconds))
        .secure(secure)
        .build()
}

/// Cookie that makes the browser drop the session.
pub fn expired_cookie(secure: bool) -> Cookie<'static> {
    session_cookie("", 0, secure)
}

/// Opaque tokens and their expiry.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    lifetime: Duration,
}

impl SessionStore {
    pub fn new(hours: i64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            lifetime: Duration::hours(hours.max(1)),
        }
    }

    pub fn max_age_seconds(&self) -> i64 {
        self.lifetime.num_seconds()
    }

    pub async fn create(&self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + self.lifetime;

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, expiry| *expiry > Utc::now());
        sessions.insert(token.clone(), expires_at);
        token
    }

    pub async fn validate(&self, token: &str) -> bool {
        match self.sessions.read().await.get(token) {
            Some(expiry) => *expiry > Utc::now(),
            None => false,
        }
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }
}

/// Redirects to the login page unless the request carries a live session.
#[handler]
pub async fn require_session(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
    ctrl: &mut FlowCtrl,
) {
    let sessions = match depot.obtain::<AppState>() {
        Ok(state) => state.sessions.clone(),
        Err(_) => {
            warn!("Application state missing from depot");
            res.render(Redirect::found(LOGIN_PATH));
            ctrl.skip_rest();
            return;
        }
    };

    let token = req.cookie(SESSION_COOKIE).map(|c| c.value().to_string());
    let authorized = match token {
        Some(token) if !token.is_empty() => sessions.validate(&token).await,
        _ => false,
    };

    if !authorized {
        debug!("Unauthenticated request to {}", req.uri().path());
        res.render(Redirect::found(LOGIN_PATH));
        ctrl.skip_rest();
    }
}
