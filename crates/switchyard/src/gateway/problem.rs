//! RFC 7807 problem responses.
//!
//! Every non-2xx REST response is `application/problem+json`. Messages for
//! auth failures stay generic, and cross-tenant reads surface as plain
//! not-found so existence never leaks.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub pointer: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl Problem {
    fn new(status: StatusCode, title: &str) -> Self {
        Self {
            problem_type: "about:blank".to_string(),
            title: title.to_string(),
            status: status.as_u16(),
            detail: None,
            instance: None,
            errors: None,
        }
    }

    pub fn bad_request(errors: Vec<FieldError>) -> Self {
        Self {
            errors: Some(errors),
            ..Self::new(StatusCode::BAD_REQUEST, "Bad Request")
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not Found")
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(StatusCode::CONFLICT, "Conflict")
        }
    }

    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(StatusCode::UNPROCESSABLE_ENTITY, "Unprocessable Entity")
        }
    }

    /// 500 with a correlation id the operator can grep the logs for. The
    /// underlying error is logged, never echoed.
    pub fn internal(correlation_id: &str) -> Self {
        Self {
            detail: Some(format!("correlation id: {correlation_id}")),
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::to_vec(&self).unwrap_or_else(|_| b"{}".to_vec());
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            body,
        )
            .into_response()
    }
}

/// Convert a ledger error into the outward problem, logging the detail.
pub fn from_db_error(e: &crate::database::DbError) -> Problem {
    if is_unique_violation(e) {
        return Problem::conflict("duplicate id");
    }
    let correlation_id = crate::short_id();
    tracing::error!(correlation = %correlation_id, error = %e, "ledger error");
    Problem::internal(&correlation_id)
}

pub fn is_unique_violation(e: &crate::database::DbError) -> bool {
    matches!(
        e,
        crate::database::DbError::Diesel(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _
        ))
    )
}

/// One-field validation failure against a JSON body.
pub fn validation_failure(pointer: &str, reason: impl Into<String>) -> Problem {
    Problem::bad_request(vec![FieldError {
        pointer: pointer.to_string(),
        reason: reason.into(),
    }])
}

/// Decode a typed body from a raw JSON value, mapping serde failures to the
/// `{pointer, reason}` problem shape.
pub fn decode_body<T: serde::de::DeserializeOwned>(body: &Value) -> Result<T, Problem> {
    serde_json::from_value(body.clone()).map_err(|e| validation_failure("/", e.to_string()))
}

/// Clamp a list `limit` query parameter into `[1, 100]`.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(50).clamp(1, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_serializes_rfc7807_fields() {
        let p = Problem::bad_request(vec![FieldError {
            pointer: "/graphId".to_string(),
            reason: "missing".to_string(),
        }]);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["status"], 400);
        assert_eq!(json["title"], "Bad Request");
        assert_eq!(json["errors"][0]["pointer"], "/graphId");
    }

    #[test]
    fn unauthorized_is_generic() {
        let p = Problem::unauthorized();
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn limit_clamping() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(100_000)), 100);
        assert_eq!(clamp_limit(Some(25)), 25);
    }
}
