//! Dispatch API routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{self, DeleteOutcome, RepositoryError};
use crate::domain::{CreateDispatchRequest, Dispatch, TripView};
use crate::events::Event;
use crate::triage::{current_trip, Bucket, Triage, TriageSummary};

use super::{ApiResponse, AppError, AppState, Pagination, RequestActor};

/// Create dispatch routes
pub fn dispatch_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_dispatches).post(create_dispatch))
        .route("/triage", get(triage_summary))
        .route("/:dispatch_id", get(get_dispatch).delete(delete_dispatch))
        .route("/:dispatch_id/assign", post(assign_transport))
}

/// A dispatch as shown on the board
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchListItem {
    #[serde(flatten)]
    pub dispatch: Dispatch,
    pub bucket: Bucket,
    pub current_trip: Option<TripView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchDetail {
    #[serde(flatten)]
    pub dispatch: Dispatch,
    pub bucket: Bucket,
    pub trips: Vec<TripView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub id: Uuid,
    /// `hard` when the row is gone, `soft` when it is only hidden
    pub mode: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ListDispatchesQuery {
    pub bucket: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTransportRequest {
    pub transport_company_id: Option<Uuid>,
    pub observation: Option<String>,
}

/// Load every live dispatch with its bucket, earliest scheduled first
pub async fn triaged_dispatches(
    pool: &SqlitePool,
    triage: &Triage,
) -> Result<Vec<DispatchListItem>, RepositoryError> {
    let total = db::count_dispatches(pool).await?;
    let dispatches = db::list_dispatches(pool, total, 0).await?;
    triage_page(pool, triage, dispatches).await
}

async fn triage_page(
    pool: &SqlitePool,
    triage: &Triage,
    dispatches: Vec<Dispatch>,
) -> Result<Vec<DispatchListItem>, RepositoryError> {
    let ids: Vec<Uuid> = dispatches.iter().map(|d| d.id).collect();
    let mut trips = db::list_trips_for_dispatches(pool, &ids).await?;
    let now = triage.now();

    Ok(dispatches
        .into_iter()
        .map(|dispatch| {
            let trips = trips.remove(&dispatch.id).unwrap_or_default();
            let bucket = triage.bucket(&dispatch, &trips, now);
            let current_trip = current_trip(&trips).cloned().map(TripView::from);
            DispatchListItem {
                dispatch,
                bucket,
                current_trip,
            }
        })
        .collect())
}

async fn list_dispatches(
    State(state): State<AppState>,
    Query(query): Query<ListDispatchesQuery>,
) -> Result<Json<ApiResponse<Vec<DispatchListItem>>>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let bucket = query
        .bucket
        .as_deref()
        .map(str::parse::<Bucket>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let (items, total) = match bucket {
        Some(bucket) => {
            let matching: Vec<DispatchListItem> =
                triaged_dispatches(&state.pool, &state.triage)
                    .await?
                    .into_iter()
                    .filter(|item| item.bucket == bucket)
                    .collect();
            let total = matching.len() as i64;
            let page = matching
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect();
            (page, total)
        }
        None => {
            let total = db::count_dispatches(&state.pool).await?;
            let dispatches = db::list_dispatches(&state.pool, limit, offset).await?;
            (triage_page(&state.pool, &state.triage, dispatches).await?, total)
        }
    };

    Ok(Json(ApiResponse::paginated(
        items,
        Pagination::new(total, limit, offset),
    )))
}

async fn triage_summary(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<TriageSummary>>, AppError> {
    let summary = triaged_dispatches(&state.pool, &state.triage)
        .await?
        .into_iter()
        .map(|item| item.bucket)
        .collect();

    Ok(Json(ApiResponse::new(summary)))
}

async fn get_dispatch(
    State(state): State<AppState>,
    Path(dispatch_id): Path<Uuid>,
) -> Result<Json<ApiResponse<DispatchDetail>>, AppError> {
    let dispatch = db::get_dispatch(&state.pool, dispatch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Dispatch {} not found", dispatch_id)))?;

    let trips = db::list_trips_for_dispatch(&state.pool, dispatch_id).await?;
    let bucket = state.triage.bucket(&dispatch, &trips, state.triage.now());

    Ok(Json(ApiResponse::new(DispatchDetail {
        dispatch,
        bucket,
        trips: trips.into_iter().map(TripView::from).collect(),
    })))
}

async fn create_dispatch(
    State(state): State<AppState>,
    Json(req): Json<CreateDispatchRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Dispatch>>), AppError> {
    if req.code.trim().is_empty() {
        return Err(AppError::BadRequest("code must not be empty".to_string()));
    }

    let dispatch = db::create_dispatch(&state.pool, &req).await?;
    tracing::info!("Created dispatch {} ({})", dispatch.code, dispatch.id);

    state.event_bus.publish(Event::DispatchCreated {
        dispatch_id: dispatch.id,
        code: dispatch.code.clone(),
        timestamp: Utc::now(),
    });

    Ok((StatusCode::CREATED, Json(ApiResponse::new(dispatch))))
}

async fn delete_dispatch(
    State(state): State<AppState>,
    Path(dispatch_id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeleteResult>>, AppError> {
    let mode = match db::delete_dispatch(&state.pool, dispatch_id).await? {
        DeleteOutcome::HardDeleted => "hard",
        DeleteOutcome::SoftDeleted => "soft",
        DeleteOutcome::NotFound => {
            return Err(AppError::NotFound(format!(
                "Dispatch {} not found",
                dispatch_id
            )))
        }
    };
    tracing::info!("Deleted dispatch {} ({})", dispatch_id, mode);

    Ok(Json(ApiResponse::new(DeleteResult {
        id: dispatch_id,
        mode,
    })))
}

async fn assign_transport(
    State(state): State<AppState>,
    Path(dispatch_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    body: Option<Json<AssignTransportRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<TripView>>), AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let trip = state
        .synchronizer
        .assign_transport(dispatch_id, req.transport_company_id, actor, req.observation)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::new(trip.into()))))
}
