use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use crate::search::SearchError;

/// `{"error": {"code": "bad_request", "message": "..."}}`
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    #[cfg(test)]
    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

pub(crate) fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

pub(crate) fn not_found(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

pub(crate) fn unavailable(code: &'static str, message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code,
        message: message.into(),
    }
}

fn gateway_timeout(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::GATEWAY_TIMEOUT,
        code: "timeout",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Malformed bodies, wrong content types and mistyped fields all answer 400.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        match &e {
            SearchError::EmptyQuery => bad_request(e.to_string()),
            SearchError::NoProvidersEnabled => {
                warn!("search requested with no providers enabled");
                unavailable("no_providers", format!("{e}; set PERPLEXITY_API_KEY or FIRECRAWL_API_KEY"))
            }
            SearchError::Timeout { .. } => gateway_timeout(e.to_string()),
            SearchError::OperationLost(_) => {
                error!(error = %e, "search operation lost");
                internal(e.to_string())
            }
        }
    }
}
