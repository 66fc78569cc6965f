//! HTTP stages of the temperature-by-CEP chain.
//!
//! ```text
//! client ──POST /consulta──▶ front ──POST /temperaturebycep──▶ temperature
//!                            (validate, forward)               (race CEP providers,
//!                                                               weather lookup)
//! ```
//!
//! The front stage forwards under its own budget; the temperature stage
//! inherits that budget and trace through request headers.

pub mod front;
pub mod temperature;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Body accepted by both stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CepRequest {
    #[serde(default)]
    pub cep: String,
}

impl CepRequest {
    /// Lenient decode: an unreadable body yields an empty CEP, which then
    /// fails validation like any other bad input.
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// Errors a stage reports to its caller.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("invalid zipcode")]
    InvalidZipcode,

    #[error("can not find zipcode")]
    ZipcodeNotFound,

    #[error("city not found for zipcode")]
    CityMissing,

    #[error("error fetching temperature")]
    Weather,

    #[error("error calling temperature service")]
    Downstream,

    /// A downstream stage's own error reply, passed through unchanged.
    #[error("{body}")]
    Relayed {
        status: u16,
        content_type: Option<String>,
        body: String,
    },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("request cancelled")]
    Cancelled,

    #[error("service misconfigured")]
    Misconfigured,
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidZipcode => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::ZipcodeNotFound => StatusCode::NOT_FOUND,
            ServiceError::CityMissing
            | ServiceError::Weather
            | ServiceError::Downstream
            | ServiceError::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Relayed { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ServiceError::Relayed {
                content_type, body, ..
            } => {
                let content_type = content_type.unwrap_or_else(|| "application/json".to_owned());
                (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
            }
            other => (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                other.to_string(),
            )
                .into_response(),
        }
    }
}
