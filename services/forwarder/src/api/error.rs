//! API error types and helpers.
//!
//! # Purpose
//! Centralizes the uniform response envelope and the mapping from the error
//! taxonomy to HTTP statuses so every endpoint fails the same way.
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use courier_core::Error;
use serde::Serialize;
use utoipa::ToSchema;

/// Uniform response envelope: `{success, message, partnerId?, timestamp}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    pub timestamp: u64,
}

impl Envelope {
    pub fn ok(message: impl Into<String>, partner_id: Option<&str>) -> Self {
        Self {
            success: true,
            message: message.into(),
            partner_id: partner_id.map(str::to_string),
            timestamp: courier_core::now_millis(),
        }
    }

    pub fn error(message: impl Into<String>, partner_id: Option<&str>) -> Self {
        Self {
            success: false,
            message: message.into(),
            partner_id: partner_id.map(str::to_string),
            timestamp: courier_core::now_millis(),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Envelope,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub fn api_bad_request(message: &str, partner_id: Option<&str>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        body: Envelope::error(message, partner_id),
    }
}

pub fn api_not_found(message: &str, partner_id: Option<&str>) -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        body: Envelope::error(message, partner_id),
    }
}

pub fn api_internal(message: &str, partner_id: Option<&str>) -> ApiError {
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: Envelope::error(message, partner_id),
    }
}

/// Default taxonomy mapping: invalid input 400, unknown tenant 404,
/// everything else 500 with the message in the envelope.
pub fn from_error(err: &Error, partner_id: Option<&str>) -> ApiError {
    let status = match err {
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ApiError {
        status,
        body: Envelope::error(err.to_string(), partner_id),
    }
}
