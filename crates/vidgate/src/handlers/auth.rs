//! Login flow endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::params::{self, IdParam};
use super::problem_details::{self, ProblemDetails};
use crate::server::AppState;
use crate::session::SessionId;

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    /// Presence starts a login; the value is ignored.
    #[serde(default)]
    start_auth: Option<Value>,
    #[serde(default)]
    session_id: Option<IdParam>,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl AuthResponse {
    fn success() -> Self {
        Self {
            status: "success",
            session_id: None,
        }
    }
}

/// POST /auth
///
/// `{start_auth, session_id?}` opens (or reuses) a session and configures its
/// client. Afterwards `{session_id, phone_number | code | password}` forwards
/// one login step.
pub async fn auth(
    State(state): State<AppState>,
    body: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ProblemDetails> {
    let Json(request) = body.map_err(|e| problem_details::bad_request(e.body_text()))?;

    if request.start_auth.is_some() {
        let session_id = match &request.session_id {
            Some(id) => Some(id.parse::<SessionId>("session_id")?),
            None => None,
        }
        .filter(|id| id.get() != 0)
        .unwrap_or_else(SessionId::random);

        let session = state.sessions.get_or_create(session_id).await?;
        state.authenticator.start(&session).await?;
        return Ok(Json(AuthResponse {
            status: "success",
            session_id: Some(session_id),
        }));
    }

    let session_id: SessionId = params::required_id("session_id", request.session_id.as_ref())?;
    let session = state.sessions.get_or_create(session_id).await?;
    let authenticator = &state.authenticator;

    if let Some(phone_number) = request.phone_number {
        authenticator.submit_phone_number(&session, phone_number).await?;
    } else if let Some(code) = request.code {
        authenticator.submit_code(&session, code).await?;
    } else if let Some(password) = request.password {
        authenticator.submit_password(&session, password).await?;
    } else {
        return Err(problem_details::bad_request(
            "expected one of 'start_auth', 'phone_number', 'code', 'password'",
        ));
    }
    Ok(Json(AuthResponse::success()))
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    session_id: Option<String>,
    wait_for: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: String,
}

/// GET /auth/get_state
///
/// With `wait_for`, blocks until the client reaches that state.
pub async fn get_state(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Json<StateResponse>, ProblemDetails> {
    let session_id: SessionId = params::required("session_id", query.session_id.as_deref())?;
    let wait_for = query.wait_for.as_deref().filter(|s| !s.is_empty());

    let session = state.sessions.get_or_create(session_id).await?;
    let current = state.authenticator.state(&session, wait_for).await?;
    Ok(Json(StateResponse { state: current }))
}

#[derive(Debug, Deserialize)]
pub struct LogoutQuery {
    session_id: Option<String>,
}

/// GET /logout
pub async fn logout(
    State(state): State<AppState>,
    Query(query): Query<LogoutQuery>,
) -> Result<Json<AuthResponse>, ProblemDetails> {
    let session_id: SessionId = params::required("session_id", query.session_id.as_deref())?;
    let Some(session) = state.sessions.get(session_id) else {
        return Err(problem_details::not_found(format!("session {session_id} is not open")));
    };

    state.authenticator.logout(&state.sessions, &session).await?;
    Ok(Json(AuthResponse::success()))
}
