use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::channels::graph::ChannelError;
use crate::guard::DenyReason;

/// Error kinds crossing internal boundaries. Only `into_response` knows
/// about HTTP.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("send denied: {}", .0.as_str())]
    SendDenied(DenyReason),
    #[error("budget denied: {0}")]
    BudgetDenied(String),
    #[error("rate limited")]
    RateLimited,
    #[error(transparent)]
    Upstream(#[from] ChannelError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<sqlx::Error> for HubError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.into())
    }
}

impl HubError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SendDenied(_) => StatusCode::CONFLICT,
            Self::BudgetDenied(_) => StatusCode::PAYMENT_REQUIRED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason string returned to callers.
    pub fn reason(&self) -> String {
        match self {
            Self::Unauthorized => "unauthorized".to_string(),
            Self::Forbidden(reason) => reason.clone(),
            Self::BadRequest(reason) => reason.clone(),
            Self::NotFound(what) => format!("{what}_not_found"),
            Self::SendDenied(reason) => reason.as_str().to_string(),
            Self::BudgetDenied(reason) => reason.clone(),
            Self::RateLimited => "rate_limited".to_string(),
            Self::Upstream(err) => err.code().to_string(),
            Self::Storage(_) => "internal_error".to_string(),
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self:?}");
        }
        (status, Json(json!({"error": self.reason()}))).into_response()
    }
}
