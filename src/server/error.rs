use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::warn;

use crate::result::PipelineError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// An error returned to the client as a `{error, details}` JSON body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let message = match &err {
            PipelineError::Resolve(_) => "Video fetch failed",
            PipelineError::Fetch(_) => "Download failed",
            PipelineError::Assemble(_) => "Merging failed",
            PipelineError::Delivery(_) => "Delivery failed",
        };
        let status = if err.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            match &err {
                PipelineError::Resolve(_) | PipelineError::Fetch(_) => StatusCode::BAD_REQUEST,
                PipelineError::Assemble(_) | PipelineError::Delivery(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
        };

        warn!("{message}: {err}");
        let details = err.details().unwrap_or_else(|| err.to_string());
        ApiError::new(status, message).with_details(details)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}
