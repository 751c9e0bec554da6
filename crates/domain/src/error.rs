use serde::Serialize;
use thiserror::Error;

#[cfg(feature = "server")]
use axum::response::IntoResponse;

/// The portable error taxonomy. Every transport maps these variants to its
/// own status codes; nothing above this type should invent new failure
/// shapes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("missing or invalid identity token")]
    Unauthenticated,

    #[error("not authorized for tenant {tenant}")]
    Forbidden { tenant: String },

    #[error("a sync session is required")]
    SessionRequired,

    #[error("session is unknown, expired, or belongs to another user")]
    SessionInvalid,

    #[error("epoch mismatch: server is at {server_epoch}")]
    EpochMismatch { server_epoch: i64 },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{resource} is gone (tombstoned)")]
    Gone { resource: String },

    #[error("precondition failed: expected version {expected}, found {actual}")]
    PreconditionFailed { expected: i64, actual: i64 },

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Error {
        Error::Validation(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Error {
        Error::NotFound {
            resource: resource.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Error {
        Error::Internal(msg.into())
    }

    /// Short machine-readable classifier, carried in every error body
    /// alongside the human string.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION",
            Error::Unauthenticated => "UNAUTHENTICATED",
            Error::Forbidden { .. } => "FORBIDDEN",
            Error::SessionRequired => "SESSION_REQUIRED",
            Error::SessionInvalid => "SESSION_INVALID",
            Error::EpochMismatch { .. } => "EPOCH_MISMATCH",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Gone { .. } => "GONE",
            Error::PreconditionFailed { .. } => "PRECONDITION_FAILED",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

/// Serializes as the display string; callers that need the structured body
/// (code, retry hints) go through [`ErrorBody`] instead.
impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.to_string())
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_epoch: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        ErrorBody {
            error: e.to_string(),
            code: e.code(),
            server_epoch: match e {
                Error::EpochMismatch { server_epoch } => Some(*server_epoch),
                _ => None,
            },
            retry_after_secs: match e {
                Error::RateLimited { retry_after_secs } => Some(*retry_after_secs),
                _ => None,
            },
        }
    }
}

#[cfg(feature = "server")]
impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::SessionRequired => StatusCode::UNAUTHORIZED,
            Error::SessionInvalid => StatusCode::UNAUTHORIZED,
            Error::EpochMismatch { .. } => StatusCode::CONFLICT,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Gone { .. } => StatusCode::GONE,
            Error::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorBody::from(&self);
        let mut response = (status, axum::Json(body)).into_response();
        if let Error::RateLimited { retry_after_secs } = &self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(feature = "rpc")]
impl From<Error> for tonic::Status {
    fn from(e: Error) -> tonic::Status {
        use tonic::Code;

        let code = match &e {
            Error::Validation(_) => Code::InvalidArgument,
            Error::Unauthenticated => Code::Unauthenticated,
            Error::Forbidden { .. } => Code::PermissionDenied,
            Error::SessionRequired => Code::FailedPrecondition,
            Error::SessionInvalid => Code::FailedPrecondition,
            Error::EpochMismatch { .. } => Code::Aborted,
            Error::NotFound { .. } => Code::NotFound,
            Error::Gone { .. } => Code::NotFound,
            Error::PreconditionFailed { .. } => Code::FailedPrecondition,
            Error::RateLimited { .. } => Code::ResourceExhausted,
            Error::Internal(_) => Code::Internal,
        };
        tonic::Status::new(code, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // Variant -> code mapping
    // ============================================================

    #[test]
    fn validation_code() {
        let e = Error::validation("bad uuid");
        assert_eq!(e.code(), "VALIDATION");
        assert_eq!(e.to_string(), "bad uuid");
    }

    #[test]
    fn epoch_mismatch_carries_server_epoch() {
        let e = Error::EpochMismatch { server_epoch: 7 };
        let body = ErrorBody::from(&e);
        assert_eq!(body.server_epoch, Some(7));
        assert_eq!(body.code, "EPOCH_MISMATCH");
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let e = Error::RateLimited { retry_after_secs: 42 };
        let body = ErrorBody::from(&e);
        assert_eq!(body.retry_after_secs, Some(42));
    }

    #[cfg(feature = "server")]
    mod server {
        use super::*;
        use axum::response::IntoResponse;

        #[test]
        fn not_found_maps_to_404() {
            let e = Error::not_found("note");
            let response = e.into_response();
            assert_eq!(response.status(), 404);
        }

        #[test]
        fn gone_maps_to_410() {
            let e = Error::Gone { resource: "note".into() };
            assert_eq!(e.into_response().status(), 410);
        }

        #[test]
        fn epoch_mismatch_maps_to_409() {
            let e = Error::EpochMismatch { server_epoch: 2 };
            assert_eq!(e.into_response().status(), 409);
        }
    }
}
