//! Dispatch database operations

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{CreateDispatchRequest, Dispatch, TrackState};

use super::{
    format_local, parse_field, parse_local, parse_optional_timestamp, parse_timestamp,
    parse_uuid, RepositoryError,
};

/// Row type for dispatches table
#[derive(Debug, sqlx::FromRow)]
pub struct DispatchRow {
    pub id: String,
    pub code: String,
    pub origin_location_id: String,
    pub destination_location_id: String,
    pub scheduled_at: String,
    pub priority: String,
    pub assignment_origin: String,
    pub status: String,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DispatchRow {
    pub fn to_dispatch(&self) -> Result<Dispatch, RepositoryError> {
        Ok(Dispatch {
            id: parse_uuid(&self.id)?,
            code: self.code.clone(),
            origin_location_id: parse_uuid(&self.origin_location_id)?,
            destination_location_id: parse_uuid(&self.destination_location_id)?,
            scheduled_at: parse_local(&self.scheduled_at)?,
            priority: parse_field(&self.priority)?,
            assignment_origin: parse_field(&self.assignment_origin)?,
            status: parse_field(&self.status)?,
            deleted_at: parse_optional_timestamp(&self.deleted_at)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Result of deleting a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// No trip ever existed; the row is gone
    HardDeleted,
    /// Trips exist; the dispatch and its trips are marked deleted
    SoftDeleted,
    NotFound,
}

/// Get a non-deleted dispatch by ID
pub async fn get_dispatch(
    pool: &SqlitePool,
    dispatch_id: Uuid,
) -> Result<Option<Dispatch>, RepositoryError> {
    let row = sqlx::query_as::<_, DispatchRow>(
        "SELECT * FROM dispatches WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(dispatch_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| r.to_dispatch()).transpose()
}

/// List non-deleted dispatches, earliest scheduled first
pub async fn list_dispatches(
    pool: &SqlitePool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Dispatch>, RepositoryError> {
    let rows = sqlx::query_as::<_, DispatchRow>(
        r#"
        SELECT * FROM dispatches
        WHERE deleted_at IS NULL
        ORDER BY scheduled_at ASC, code ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter().map(|r| r.to_dispatch()).collect()
}

pub async fn count_dispatches(pool: &SqlitePool) -> Result<i64, RepositoryError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM dispatches WHERE deleted_at IS NULL")
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Create a new dispatch; codes are unique
pub async fn create_dispatch(
    pool: &SqlitePool,
    req: &CreateDispatchRequest,
) -> Result<Dispatch, RepositoryError> {
    let dispatch = Dispatch::new(req);

    let result = sqlx::query(
        r#"
        INSERT INTO dispatches (id, code, origin_location_id, destination_location_id, scheduled_at, priority, assignment_origin, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(dispatch.id.to_string())
    .bind(&dispatch.code)
    .bind(dispatch.origin_location_id.to_string())
    .bind(dispatch.destination_location_id.to_string())
    .bind(format_local(&dispatch.scheduled_at))
    .bind(dispatch.priority.as_str())
    .bind(dispatch.assignment_origin.as_str())
    .bind(dispatch.status.as_str())
    .bind(dispatch.created_at.to_rfc3339())
    .bind(dispatch.updated_at.to_rfc3339())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(dispatch),
        Err(e) => {
            let err = RepositoryError::from(e);
            if err.is_unique_violation() {
                Err(RepositoryError::Conflict(format!(
                    "dispatch code {} already exists",
                    dispatch.code
                )))
            } else {
                Err(err)
            }
        }
    }
}

/// Mirror the summary status onto a dispatch
pub async fn update_dispatch_status(
    conn: &mut SqliteConnection,
    dispatch_id: Uuid,
    status: TrackState,
    at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let result = sqlx::query("UPDATE dispatches SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(at.to_rfc3339())
        .bind(dispatch_id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!("dispatch {}", dispatch_id)));
    }
    Ok(())
}

/// Hard-delete a dispatch that never had a trip, soft-delete it (and its trips) otherwise
pub async fn delete_dispatch(
    pool: &SqlitePool,
    dispatch_id: Uuid,
) -> Result<DeleteOutcome, RepositoryError> {
    let mut tx = pool.begin().await?;
    let id = dispatch_id.to_string();

    let exists: Option<String> =
        sqlx::query_scalar("SELECT id FROM dispatches WHERE id = ? AND deleted_at IS NULL")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;
    if exists.is_none() {
        return Ok(DeleteOutcome::NotFound);
    }

    let trip_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trips WHERE dispatch_id = ?")
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;

    let outcome = if trip_count == 0 {
        sqlx::query("DELETE FROM dispatches WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        DeleteOutcome::HardDeleted
    } else {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE trips SET deleted_at = ?, updated_at = ? WHERE dispatch_id = ? AND deleted_at IS NULL")
            .bind(&now)
            .bind(&now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE dispatches SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        DeleteOutcome::SoftDeleted
    };

    tx.commit().await?;
    Ok(outcome)
}
