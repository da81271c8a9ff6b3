//! REST API routes for Nodexia

mod actor;
mod dispatches;
mod routes;
mod trips;
mod ws;

pub use actor::*;
pub use dispatches::*;
pub use routes::*;
pub use trips::*;
pub use ws::*;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{RepositoryError, SqliteRepository};
use crate::events::EventBus;
use crate::notifications::NotificationTrigger;
use crate::sync::{SyncError, Synchronizer};
use crate::triage::Triage;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            meta: ResponseMeta {
                timestamp: Utc::now(),
                pagination: None,
            },
        }
    }

    pub fn paginated(data: T, pagination: Pagination) -> Self {
        Self {
            data,
            meta: ResponseMeta {
                timestamp: Utc::now(),
                pagination: Some(pagination),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

/// Pagination information
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(total: i64, limit: i64, offset: i64) -> Self {
        Self {
            total,
            limit,
            offset,
            has_more: total > offset + limit,
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
                details: None,
            },
        }
    }

    pub fn with_details(code: &str, message: &str, details: serde_json::Value) -> Self {
        Self {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
                details: Some(details),
            },
        }
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    MissingActor(String),
    InvalidTransition {
        message: String,
        details: serde_json::Value,
    },
    Conflict {
        code: &'static str,
        message: String,
    },
    NotClosable(String),
    PersistenceFailure(String),
    DatabaseError(String),
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ApiError::with_details(
                    "NOT_FOUND",
                    &msg,
                    serde_json::json!({ "previousState": null, "suggestedActions": [] }),
                ),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ApiError::new("BAD_REQUEST", &msg),
            ),
            AppError::MissingActor(msg) => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("MISSING_ACTOR", &msg),
            ),
            AppError::InvalidTransition { message, details } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::with_details("INVALID_TRANSITION", &message, details),
            ),
            AppError::Conflict { code, message } => {
                (StatusCode::CONFLICT, ApiError::new(code, &message))
            }
            AppError::NotClosable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::new("TRIP_NOT_CLOSABLE", &msg),
            ),
            AppError::PersistenceFailure(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::new("PERSISTENCE_FAILURE", &msg),
            ),
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("DATABASE_ERROR", &msg),
            ),
            AppError::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("INTERNAL_ERROR", &msg),
            ),
        };

        (status, Json(error)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            RepositoryError::Conflict(msg) => AppError::Conflict {
                code: "CONFLICT",
                message: msg,
            },
            RepositoryError::StaleVersion { .. } => AppError::Conflict {
                code: "CONCURRENT_MODIFICATION",
                message: "State changed, retry".to_string(),
            },
            RepositoryError::Database(e) => AppError::DatabaseError(e.to_string()),
            RepositoryError::Corrupt(msg) => AppError::InternalError(msg),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::NotFound(_) => AppError::NotFound(message),
            SyncError::InvalidTransition {
                previous_state,
                requested,
                reason,
                next_valid_states,
            } => AppError::InvalidTransition {
                message,
                details: serde_json::json!({
                    "previousState": previous_state,
                    "requestedState": requested,
                    "reason": reason,
                    "suggestedActions": next_valid_states,
                }),
            },
            SyncError::ConcurrentModification => AppError::Conflict {
                code: "CONCURRENT_MODIFICATION",
                message,
            },
            SyncError::DispatchHasActiveTrip(_) => AppError::Conflict {
                code: "DISPATCH_HAS_ACTIVE_TRIP",
                message,
            },
            SyncError::DispatchClosed(_) => AppError::Conflict {
                code: "DISPATCH_CLOSED",
                message,
            },
            SyncError::TripNotClosable(_) => AppError::NotClosable(message),
            SyncError::PersistenceFailure(_) => AppError::PersistenceFailure(message),
            SyncError::InvalidRequest(msg) => AppError::BadRequest(msg),
        }
    }
}

/// Application state shared between handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub synchronizer: Arc<Synchronizer>,
    pub triage: Triage,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        notifier: NotificationTrigger,
        config: &Config,
    ) -> Self {
        let repository = Arc::new(SqliteRepository::new(pool.clone()));
        let synchronizer = Synchronizer::new(repository, notifier, event_bus.clone())
            .with_persist_retries(config.synchronizer.persist_retries);

        Self {
            pool,
            event_bus,
            synchronizer: Arc::new(synchronizer),
            triage: Triage::from_config(&config.triage),
        }
    }
}
