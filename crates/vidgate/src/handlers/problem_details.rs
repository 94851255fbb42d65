//! RFC 7807 problem details responses.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            problem_type: "about:blank".to_string(),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: Some(detail.into()),
        }
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            Json(self),
        )
            .into_response()
    }
}

pub fn bad_request(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::BAD_REQUEST, detail)
}

pub fn not_found(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::NOT_FOUND, detail)
}

pub fn conflict(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::CONFLICT, detail)
}

pub fn range_not_satisfiable(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::RANGE_NOT_SATISFIABLE, detail)
}

pub fn internal_error(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
}

pub fn service_unavailable(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::SERVICE_UNAVAILABLE, detail)
}

pub fn gateway_timeout(detail: impl Into<String>) -> ProblemDetails {
    ProblemDetails::new(StatusCode::GATEWAY_TIMEOUT, detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_follows_status() {
        let problem = range_not_satisfiable("bytes=9-1");
        assert_eq!(problem.status, 416);
        assert_eq!(problem.title, "Range Not Satisfiable");
        assert_eq!(problem.problem_type, "about:blank");
    }

    #[test]
    fn response_uses_problem_content_type() {
        let response = gateway_timeout("no reply").into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
