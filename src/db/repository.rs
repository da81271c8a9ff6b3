//! Persistence boundary used by the synchronizer

use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Dispatch, TrackState, Trip, TripLogEntry};

use super::{dispatches, trips};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Trip {trip_id} is no longer at version {expected_version}")]
    StaleVersion { trip_id: Uuid, expected_version: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl RepositoryError {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            RepositoryError::Database(sqlx::Error::Database(e)) => e.is_unique_violation(),
            _ => false,
        }
    }
}

/// A trip write together with everything that must land with it
#[derive(Debug, Clone)]
pub struct TripChange {
    pub trip: Trip,
    /// Version the trip had when it was loaded
    pub expected_version: i64,
    pub log_entries: Vec<TripLogEntry>,
    pub dispatch_status: TrackState,
}

#[async_trait]
pub trait TripRepository: Send + Sync {
    /// Load a trip unless it or its dispatch is soft-deleted
    async fn load_trip(&self, trip_id: Uuid) -> Result<Option<Trip>, RepositoryError>;

    async fn load_dispatch(&self, dispatch_id: Uuid) -> Result<Option<Dispatch>, RepositoryError>;

    /// Non-deleted trips of a dispatch, by trip number
    async fn list_trips(&self, dispatch_id: Uuid) -> Result<Vec<Trip>, RepositoryError>;

    /// Write the trip (conditional on `expected_version`), its log entries and
    /// the dispatch summary in one transaction. Returns the trip as stored.
    async fn commit_change(&self, change: &TripChange) -> Result<Trip, RepositoryError>;

    /// Insert a new trip numbered after the dispatch's existing ones, its log
    /// entry and the dispatch summary in one transaction. Fails with
    /// `Conflict` when the dispatch already has an active or completed trip.
    async fn create_trip(
        &self,
        trip: Trip,
        log_entry: TripLogEntry,
        dispatch_status: TrackState,
    ) -> Result<Trip, RepositoryError>;
}

/// SQLite-backed repository
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TripRepository for SqliteRepository {
    async fn load_trip(&self, trip_id: Uuid) -> Result<Option<Trip>, RepositoryError> {
        trips::get_trip(&self.pool, trip_id).await
    }

    async fn load_dispatch(&self, dispatch_id: Uuid) -> Result<Option<Dispatch>, RepositoryError> {
        dispatches::get_dispatch(&self.pool, dispatch_id).await
    }

    async fn list_trips(&self, dispatch_id: Uuid) -> Result<Vec<Trip>, RepositoryError> {
        trips::list_trips_for_dispatch(&self.pool, dispatch_id).await
    }

    async fn commit_change(&self, change: &TripChange) -> Result<Trip, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let stored = trips::update_trip_versioned(&mut *tx, &change.trip, change.expected_version)
            .await?
            .ok_or(RepositoryError::StaleVersion {
                trip_id: change.trip.id,
                expected_version: change.expected_version,
            })?;

        for entry in &change.log_entries {
            trips::insert_log_entry(&mut *tx, entry).await?;
        }

        dispatches::update_dispatch_status(
            &mut *tx,
            change.trip.dispatch_id,
            change.dispatch_status,
            change.trip.updated_at,
        )
        .await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn create_trip(
        &self,
        mut trip: Trip,
        log_entry: TripLogEntry,
        dispatch_status: TrackState,
    ) -> Result<Trip, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let states = trips::trip_states_for_dispatch(&mut *tx, trip.dispatch_id).await?;
        if let Some(state) = states.iter().find(|s| !s.is_cancelled()) {
            return Err(RepositoryError::Conflict(format!(
                "dispatch {} already has a trip at {}",
                trip.dispatch_id, state.unit
            )));
        }

        trip.trip_number = trips::next_trip_number(&mut *tx, trip.dispatch_id).await?;
        trips::insert_trip(&mut *tx, &trip).await?;
        trips::insert_log_entry(&mut *tx, &log_entry).await?;
        dispatches::update_dispatch_status(&mut *tx, trip.dispatch_id, dispatch_status, trip.updated_at)
            .await?;

        tx.commit().await?;
        Ok(trip)
    }
}
