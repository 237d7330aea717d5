//! Mapping of service errors onto HTTP responses

use axum::{
	extract::rejection::{JsonRejection, QueryRejection},
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use pos_sync_core::service::server::{IngestError, OrderError, SessionError, StoreError};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
	#[error("{0}")]
	BadRequest(String),

	#[error("{0}")]
	NotFound(String),

	/// The request does not fit the current state. `current` is returned as
	/// `data` so clients can record what the server holds.
	#[error("{message}")]
	Conflict { message: String, current: Option<Value> },

	#[error("{0}")]
	Internal(String),
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, data) = match &self {
			ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
			ApiError::NotFound(_) => (StatusCode::NOT_FOUND, None),
			ApiError::Conflict { current, .. } => (StatusCode::CONFLICT, current.clone()),
			ApiError::Internal(message) => {
				error!(%message, "Request failed");
				(StatusCode::INTERNAL_SERVER_ERROR, None)
			}
		};

		let mut body = json!({
			"status": "error",
			"message": self.to_string(),
		});
		if let Some(data) = data {
			body["data"] = data;
		}

		(status, Json(body)).into_response()
	}
}

impl From<SessionError> for ApiError {
	fn from(err: SessionError) -> Self {
		match err {
			SessionError::Validation(message) => ApiError::BadRequest(message),
			SessionError::NotFound(_) => ApiError::NotFound(err.to_string()),
			SessionError::InvalidTransition { .. } => ApiError::Conflict {
				message: err.to_string(),
				current: None,
			},
			SessionError::Corrupt(_) | SessionError::Database(_) | SessionError::Serialization(_) => {
				ApiError::Internal(err.to_string())
			}
		}
	}
}

impl From<OrderError> for ApiError {
	fn from(err: OrderError) -> Self {
		match err {
			OrderError::Validation(message) => ApiError::BadRequest(message),
			OrderError::NotFound(_) => ApiError::NotFound(err.to_string()),
			OrderError::Conflict { ref current } => ApiError::Conflict {
				message: err.to_string(),
				current: serde_json::to_value(current.as_ref()).ok(),
			},
			OrderError::Corrupt(_) | OrderError::Database(_) | OrderError::Serialization(_) => {
				ApiError::Internal(err.to_string())
			}
		}
	}
}

impl From<IngestError> for ApiError {
	fn from(err: IngestError) -> Self {
		match err {
			IngestError::EmptyBatch => ApiError::BadRequest(err.to_string()),
		}
	}
}

impl From<StoreError> for ApiError {
	fn from(err: StoreError) -> Self {
		match err {
			StoreError::Validation(message) => ApiError::BadRequest(message),
			StoreError::Database(_) => ApiError::Internal(err.to_string()),
		}
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		ApiError::BadRequest(rejection.body_text())
	}
}

impl From<QueryRejection> for ApiError {
	fn from(rejection: QueryRejection) -> Self {
		ApiError::BadRequest(rejection.body_text())
	}
}
