//! Trip and trip log database operations

use std::collections::HashMap;

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{Actor, DualState, Milestones, TrackState, Trip, TripLogEntry};

use super::{
    parse_field, parse_optional_timestamp, parse_optional_uuid, parse_timestamp, parse_uuid,
    RepositoryError,
};

/// Row type for trips table
#[derive(Debug, sqlx::FromRow)]
pub struct TripRow {
    pub id: String,
    pub dispatch_id: String,
    pub trip_number: i32,
    pub unit_state: String,
    pub cargo_state: String,
    pub assignment_origin: String,
    pub transport_company_id: Option<String>,
    pub driver_id: Option<String>,
    pub truck_id: Option<String>,
    pub trailer_id: Option<String>,
    pub milestones: String,
    pub version: i64,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TripRow {
    pub fn to_trip(&self) -> Result<Trip, RepositoryError> {
        let milestones: Milestones = serde_json::from_str(&self.milestones)
            .map_err(|e| RepositoryError::Corrupt(format!("trip {} milestones: {}", self.id, e)))?;

        Ok(Trip {
            id: parse_uuid(&self.id)?,
            dispatch_id: parse_uuid(&self.dispatch_id)?,
            trip_number: self.trip_number,
            unit_state: parse_field(&self.unit_state)?,
            cargo_state: parse_field(&self.cargo_state)?,
            assignment_origin: parse_field(&self.assignment_origin)?,
            transport_company_id: parse_optional_uuid(&self.transport_company_id)?,
            driver_id: parse_optional_uuid(&self.driver_id)?,
            truck_id: parse_optional_uuid(&self.truck_id)?,
            trailer_id: parse_optional_uuid(&self.trailer_id)?,
            milestones,
            version: self.version,
            deleted_at: parse_optional_timestamp(&self.deleted_at)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Row type for trip_log table
#[derive(Debug, sqlx::FromRow)]
pub struct TripLogRow {
    pub id: String,
    pub trip_id: String,
    pub kind: String,
    pub track: String,
    pub from_state: String,
    pub to_state: String,
    pub actor_id: String,
    pub actor_role: String,
    pub observation: Option<String>,
    pub annotation: String,
    pub created_at: String,
}

impl TripLogRow {
    pub fn to_entry(&self) -> Result<TripLogEntry, RepositoryError> {
        let track = parse_field(&self.track)?;

        Ok(TripLogEntry {
            id: parse_uuid(&self.id)?,
            trip_id: parse_uuid(&self.trip_id)?,
            kind: parse_field(&self.kind)?,
            track,
            from_state: TrackState::parse(track, &self.from_state)
                .map_err(RepositoryError::Corrupt)?,
            to_state: TrackState::parse(track, &self.to_state)
                .map_err(RepositoryError::Corrupt)?,
            actor: Actor::new(self.actor_id.clone(), parse_field(&self.actor_role)?),
            observation: self.observation.clone(),
            annotation: self.annotation.clone(),
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

const SELECT_LIVE_TRIPS: &str = r#"
    SELECT t.* FROM trips t
    JOIN dispatches d ON d.id = t.dispatch_id
    WHERE t.deleted_at IS NULL AND d.deleted_at IS NULL
"#;

/// Get a trip by ID unless it or its dispatch is soft-deleted
pub async fn get_trip(pool: &SqlitePool, trip_id: Uuid) -> Result<Option<Trip>, RepositoryError> {
    let query = format!("{} AND t.id = ?", SELECT_LIVE_TRIPS);
    let row = sqlx::query_as::<_, TripRow>(&query)
        .bind(trip_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| r.to_trip()).transpose()
}

/// Live trips of one dispatch, by trip number
pub async fn list_trips_for_dispatch(
    pool: &SqlitePool,
    dispatch_id: Uuid,
) -> Result<Vec<Trip>, RepositoryError> {
    let query = format!(
        "{} AND t.dispatch_id = ? ORDER BY t.trip_number ASC",
        SELECT_LIVE_TRIPS
    );
    let rows = sqlx::query_as::<_, TripRow>(&query)
        .bind(dispatch_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(|r| r.to_trip()).collect()
}

/// Live trips of several dispatches, grouped by dispatch
pub async fn list_trips_for_dispatches(
    pool: &SqlitePool,
    dispatch_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Trip>>, RepositoryError> {
    let mut grouped: HashMap<Uuid, Vec<Trip>> = HashMap::new();
    if dispatch_ids.is_empty() {
        return Ok(grouped);
    }

    let placeholders: Vec<&str> = dispatch_ids.iter().map(|_| "?").collect();
    let query = format!(
        "{} AND t.dispatch_id IN ({}) ORDER BY t.dispatch_id, t.trip_number ASC",
        SELECT_LIVE_TRIPS,
        placeholders.join(",")
    );

    let mut q = sqlx::query_as::<_, TripRow>(&query);
    for id in dispatch_ids {
        q = q.bind(id.to_string());
    }

    for row in q.fetch_all(pool).await? {
        let trip = row.to_trip()?;
        grouped.entry(trip.dispatch_id).or_default().push(trip);
    }
    Ok(grouped)
}

/// Audit entries of a trip, oldest first
pub async fn list_trip_log(
    pool: &SqlitePool,
    trip_id: Uuid,
) -> Result<Vec<TripLogEntry>, RepositoryError> {
    let rows = sqlx::query_as::<_, TripLogRow>(
        "SELECT * FROM trip_log WHERE trip_id = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(trip_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(|r| r.to_entry()).collect()
}

/// States of every non-deleted trip of a dispatch
pub async fn trip_states_for_dispatch(
    conn: &mut SqliteConnection,
    dispatch_id: Uuid,
) -> Result<Vec<DualState>, RepositoryError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT unit_state, cargo_state FROM trips WHERE dispatch_id = ? AND deleted_at IS NULL",
    )
    .bind(dispatch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|(unit, cargo)| Ok(DualState::new(parse_field(unit)?, parse_field(cargo)?)))
        .collect()
}

/// Next 1-based trip number for a dispatch; deleted trips keep their numbers
pub async fn next_trip_number(
    conn: &mut SqliteConnection,
    dispatch_id: Uuid,
) -> Result<i32, RepositoryError> {
    let max: Option<i32> =
        sqlx::query_scalar("SELECT MAX(trip_number) FROM trips WHERE dispatch_id = ?")
            .bind(dispatch_id.to_string())
            .fetch_one(&mut *conn)
            .await?;
    Ok(max.unwrap_or(0) + 1)
}

fn milestones_json(trip: &Trip) -> Result<String, RepositoryError> {
    serde_json::to_string(&trip.milestones)
        .map_err(|e| RepositoryError::Corrupt(format!("trip {} milestones: {}", trip.id, e)))
}

pub async fn insert_trip(conn: &mut SqliteConnection, trip: &Trip) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO trips (id, dispatch_id, trip_number, unit_state, cargo_state, assignment_origin,
                           transport_company_id, driver_id, truck_id, trailer_id, milestones, version,
                           created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(trip.id.to_string())
    .bind(trip.dispatch_id.to_string())
    .bind(trip.trip_number)
    .bind(trip.unit_state.as_str())
    .bind(trip.cargo_state.as_str())
    .bind(trip.assignment_origin.as_str())
    .bind(trip.transport_company_id.map(|id| id.to_string()))
    .bind(trip.driver_id.map(|id| id.to_string()))
    .bind(trip.truck_id.map(|id| id.to_string()))
    .bind(trip.trailer_id.map(|id| id.to_string()))
    .bind(milestones_json(trip)?)
    .bind(trip.version)
    .bind(trip.created_at.to_rfc3339())
    .bind(trip.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(|e| match RepositoryError::from(e) {
        // A second live trip, or a racing writer that took the same number
        err if err.is_unique_violation() => RepositoryError::Conflict(format!(
            "dispatch {} already has a live trip",
            trip.dispatch_id
        )),
        err => err,
    })?;

    Ok(())
}

/// Write a trip only if it is still at `expected_version`.
///
/// Returns the stored trip with its bumped version, or `None` when another
/// writer got there first.
pub async fn update_trip_versioned(
    conn: &mut SqliteConnection,
    trip: &Trip,
    expected_version: i64,
) -> Result<Option<Trip>, RepositoryError> {
    let new_version = expected_version + 1;

    let result = sqlx::query(
        r#"
        UPDATE trips
        SET unit_state = ?, cargo_state = ?, transport_company_id = ?, driver_id = ?, truck_id = ?,
            trailer_id = ?, milestones = ?, version = ?, updated_at = ?
        WHERE id = ? AND version = ? AND deleted_at IS NULL
        "#,
    )
    .bind(trip.unit_state.as_str())
    .bind(trip.cargo_state.as_str())
    .bind(trip.transport_company_id.map(|id| id.to_string()))
    .bind(trip.driver_id.map(|id| id.to_string()))
    .bind(trip.truck_id.map(|id| id.to_string()))
    .bind(trip.trailer_id.map(|id| id.to_string()))
    .bind(milestones_json(trip)?)
    .bind(new_version)
    .bind(trip.updated_at.to_rfc3339())
    .bind(trip.id.to_string())
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    let mut stored = trip.clone();
    stored.version = new_version;
    Ok(Some(stored))
}

pub async fn insert_log_entry(
    conn: &mut SqliteConnection,
    entry: &TripLogEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO trip_log (id, trip_id, kind, track, from_state, to_state, actor_id, actor_role,
                              observation, annotation, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.trip_id.to_string())
    .bind(entry.kind.as_str())
    .bind(entry.track.as_str())
    .bind(entry.from_state.as_str())
    .bind(entry.to_state.as_str())
    .bind(&entry.actor.id)
    .bind(entry.actor.role.as_str())
    .bind(&entry.observation)
    .bind(&entry.annotation)
    .bind(entry.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}
