//! Dispatch-Trip Synchronizer
//!
//! Every trip state change goes through here. A change is validated by the
//! state machine, written together with its audit entries and the dispatch
//! summary in one transaction, then announced on the event bus and handed
//! to the notification trigger.

mod locks;

pub use locks::TripLocks;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{RepositoryError, TripChange, TripRepository};
use crate::domain::{
    summarize_trips, Actor, CargoState, LogKind, ResourceAssignment, Role, Track, TrackState,
    Trip, TripLogEntry, TripView, UnitState,
};
use crate::events::{Event, EventBus};
use crate::notifications::NotificationTrigger;
use crate::state_machine::{NextStates, TransitionError, TripStateMachine};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Cannot move from {previous_state} to {requested}: {reason}")]
    InvalidTransition {
        previous_state: TrackState,
        requested: TrackState,
        reason: String,
        next_valid_states: NextStates,
    },

    #[error("State changed, retry")]
    ConcurrentModification,

    #[error("Could not persist change: {0}")]
    PersistenceFailure(String),

    #[error("Dispatch {0} already has an active trip")]
    DispatchHasActiveTrip(Uuid),

    #[error("Dispatch {0} already has a completed trip")]
    DispatchClosed(Uuid),

    #[error("Trip cannot be closed: {0}")]
    TripNotClosable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SyncError {
    fn rejected(trip: &Trip, requested: TrackState, err: TransitionError, next: NextStates) -> Self {
        SyncError::InvalidTransition {
            previous_state: trip.state_on(requested.track()),
            requested,
            reason: err.to_string(),
            next_valid_states: next,
        }
    }
}

impl From<RepositoryError> for SyncError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => SyncError::NotFound(what),
            RepositoryError::StaleVersion { .. } => SyncError::ConcurrentModification,
            other => SyncError::PersistenceFailure(other.to_string()),
        }
    }
}

/// A requested move of one trip track
#[derive(Debug, Clone)]
pub struct TransitionCommand {
    pub trip_id: Uuid,
    pub target: TrackState,
    pub actor: Actor,
    pub observation: Option<String>,
    /// State the caller last saw on the target's track
    pub expected: Option<TrackState>,
}

impl TransitionCommand {
    pub fn new(trip_id: Uuid, target: impl Into<TrackState>, actor: Actor) -> Self {
        Self {
            trip_id,
            target: target.into(),
            actor,
            observation: None,
            expected: None,
        }
    }

    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observation = Some(observation.into());
        self
    }

    pub fn expecting(mut self, state: impl Into<TrackState>) -> Self {
        self.expected = Some(state.into());
        self
    }
}

/// Result of a transition or close
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub success: bool,
    pub trip_id: Uuid,
    pub dispatch_id: Uuid,
    pub track: Track,
    pub previous_state: TrackState,
    pub new_state: TrackState,
    pub unit_state: UnitState,
    pub cargo_state: CargoState,
    pub dispatch_status: TrackState,
    pub next_valid_states: NextStates,
    /// The trip reached `viaje_completado`
    pub closed: bool,
    /// Nothing was written
    pub idempotent: bool,
}

/// Result of setting driver/truck/trailer refs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesOutcome {
    pub trip: TripView,
    pub dispatch_status: TrackState,
    /// Unit state the trip was advanced to, if any
    pub advanced_to: Option<TrackState>,
}

/// What a commit left behind
struct Committed {
    trip: Trip,
    dispatch_status: TrackState,
}

pub struct Synchronizer {
    repository: Arc<dyn TripRepository>,
    machine: TripStateMachine,
    notifier: NotificationTrigger,
    event_bus: EventBus,
    locks: TripLocks,
    persist_retries: u32,
}

impl Synchronizer {
    pub fn new(
        repository: Arc<dyn TripRepository>,
        notifier: NotificationTrigger,
        event_bus: EventBus,
    ) -> Self {
        Self {
            repository,
            machine: TripStateMachine::new(),
            notifier,
            event_bus,
            locks: TripLocks::new(),
            persist_retries: 1,
        }
    }

    pub fn with_persist_retries(mut self, retries: u32) -> Self {
        self.persist_retries = retries;
        self
    }

    pub fn machine(&self) -> &TripStateMachine {
        &self.machine
    }

    /// Validate, apply and persist one track transition
    pub async fn apply_transition(
        &self,
        command: TransitionCommand,
    ) -> Result<TransitionOutcome, SyncError> {
        let _guard = self.locks.acquire(command.trip_id).await;

        let mut trip = self.load_trip(command.trip_id).await?;
        let track = command.target.track();
        let current = trip.state_on(track);
        let role = command.actor.role;

        if current == command.target {
            tracing::debug!(
                "Trip {} already at {}, nothing to do",
                trip.id,
                command.target
            );
            let siblings = self.repository.list_trips(trip.dispatch_id).await?;
            return Ok(self.outcome(&trip, current, summarize_trips(&siblings), role, false, true));
        }

        // A retried request whose first attempt closed the trip
        if trip.state().is_completed() && trip.milestones.reached_at(command.target).is_some() {
            tracing::debug!(
                "Trip {} already closed past {}, nothing to do",
                trip.id,
                command.target
            );
            let siblings = self.repository.list_trips(trip.dispatch_id).await?;
            return Ok(self.outcome(
                &trip,
                command.target,
                summarize_trips(&siblings),
                role,
                true,
                true,
            ));
        }

        if let Some(expected) = command.expected {
            if expected != current {
                tracing::warn!(
                    "Trip {} is at {} but caller expected {}",
                    trip.id,
                    current,
                    expected
                );
                return Err(SyncError::ConcurrentModification);
            }
        }

        let now = Utc::now();
        let expected_version = trip.version;
        let unit_before = trip.unit_state;

        let applied = match self.machine.apply(&mut trip, command.target, role, now) {
            Ok(applied) => applied,
            Err(e) => {
                tracing::warn!(
                    "Rejected transition of trip {} from {} to {} by {}: {}",
                    trip.id,
                    current,
                    command.target,
                    command.actor,
                    e
                );
                let next = self.machine.next_states(trip.state(), Some(role));
                return Err(SyncError::rejected(&trip, command.target, e, next));
            }
        };

        let entry = TripLogEntry::new(
            trip.id,
            LogKind::Transition,
            applied.previous,
            applied.new,
            &command.actor,
            command.observation,
        )
        .at(now);
        let mut entries = vec![entry.clone()];
        if applied.closed {
            entries.push(closure_entry(&trip, unit_before_close(unit_before, applied.new), now));
        }

        let committed = self.commit(trip, expected_version, entries).await?;
        let trip = committed.trip;

        tracing::info!(
            "Trip {} {}: {} -> {}{}",
            trip.id,
            track,
            applied.previous,
            applied.new,
            if applied.closed { " (closed)" } else { "" }
        );

        self.event_bus.publish(Event::TripTransitioned {
            dispatch_id: trip.dispatch_id,
            trip_id: trip.id,
            track,
            from_state: applied.previous,
            to_state: applied.new,
            closed: applied.closed,
            entry: Box::new(entry),
            timestamp: now,
        });

        self.notifier.notify(trip.id, trip.dispatch_id, applied.new);
        if applied.closed {
            self.notifier
                .notify(trip.id, trip.dispatch_id, UnitState::ViajeCompletado.into());
        }

        let mut outcome = self.outcome(
            &trip,
            applied.previous,
            committed.dispatch_status,
            role,
            applied.closed,
            false,
        );
        outcome.new_state = applied.new;
        Ok(outcome)
    }

    /// Open the next trip of a dispatch at `transporte_asignado`
    pub async fn assign_transport(
        &self,
        dispatch_id: Uuid,
        transport_company_id: Option<Uuid>,
        actor: Actor,
        observation: Option<String>,
    ) -> Result<Trip, SyncError> {
        let _guard = self.locks.acquire(dispatch_id).await;

        let dispatch = self
            .repository
            .load_dispatch(dispatch_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Dispatch {}", dispatch_id)))?;

        let trips = self.repository.list_trips(dispatch_id).await?;
        if trips.iter().any(|t| t.state().is_completed()) {
            return Err(SyncError::DispatchClosed(dispatch_id));
        }
        if trips.iter().any(Trip::is_active) {
            return Err(SyncError::DispatchHasActiveTrip(dispatch_id));
        }

        let mut trip = Trip::new(dispatch_id, dispatch.assignment_origin);
        if let Some(company_id) = transport_company_id {
            trip = trip.with_transport_company(company_id);
        }

        let entry = TripLogEntry::new(
            trip.id,
            LogKind::Assignment,
            UnitState::Pendiente.into(),
            UnitState::TransporteAsignado.into(),
            &actor,
            observation,
        )
        .at(trip.created_at);

        let previous_status = summarize_trips(&trips);
        let status = summarize_trips(trips.iter().chain(std::iter::once(&trip)));

        let repo = self.repository.as_ref();
        let trip = self
            .persist("assignment", move || {
                repo.create_trip(trip.clone(), entry.clone(), status)
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => SyncError::DispatchHasActiveTrip(dispatch_id),
                other => other.into(),
            })?;

        tracing::info!(
            "Assigned trip {} (#{}) to dispatch {} by {}",
            trip.id,
            trip.trip_number,
            dispatch.code,
            actor
        );

        self.event_bus.publish(Event::TripAssigned {
            dispatch_id,
            trip_id: trip.id,
            trip_number: trip.trip_number,
            timestamp: trip.created_at,
        });
        self.publish_status_change(dispatch_id, previous_status, status, trip.created_at);
        self.notifier
            .notify(trip.id, dispatch_id, UnitState::TransporteAsignado.into());

        Ok(trip)
    }

    /// Set driver, truck and trailer refs on an active trip.
    ///
    /// A truck given while the unit sits at `transporte_asignado` moves it
    /// to `camion_asignado` through the regular validated path.
    pub async fn assign_resources(
        &self,
        trip_id: Uuid,
        assignment: ResourceAssignment,
        actor: Actor,
        observation: Option<String>,
    ) -> Result<ResourcesOutcome, SyncError> {
        if assignment.is_empty() {
            return Err(SyncError::InvalidRequest(
                "at least one of driver, truck or trailer is required".to_string(),
            ));
        }

        let _guard = self.locks.acquire(trip_id).await;

        let mut trip = self.load_trip(trip_id).await?;
        if !trip.is_active() {
            return Err(SyncError::InvalidRequest(format!(
                "trip {} is already {}",
                trip.id,
                trip.state_on(Track::Unit)
            )));
        }

        let now = Utc::now();
        let expected_version = trip.version;
        let unit_state = trip.state_on(Track::Unit);

        assignment.apply_to(&mut trip);
        trip.updated_at = now;

        let mut entries = vec![TripLogEntry::new(
            trip.id,
            LogKind::Resources,
            unit_state,
            unit_state,
            &actor,
            observation,
        )
        .at(now)];

        let mut advanced = None;
        if trip.unit_state == UnitState::TransporteAsignado && assignment.truck_id.is_some() {
            let target = UnitState::CamionAsignado.into();
            let applied = self
                .machine
                .apply(&mut trip, target, actor.role, now)
                .map_err(|e| {
                    let next = self.machine.next_states(trip.state(), Some(actor.role));
                    SyncError::rejected(&trip, target, e, next)
                })?;
            let entry = TripLogEntry::new(
                trip.id,
                LogKind::Transition,
                applied.previous,
                applied.new,
                &actor,
                None,
            )
            .at(now);
            entries.push(entry.clone());
            advanced = Some(entry);
        }

        let committed = self.commit(trip, expected_version, entries).await?;
        let trip = committed.trip;

        tracing::info!("Resources assigned to trip {} by {}", trip.id, actor);

        self.event_bus.publish(Event::ResourcesAssigned {
            dispatch_id: trip.dispatch_id,
            trip_id: trip.id,
            timestamp: now,
        });

        let advanced_to = advanced.map(|entry| {
            let to_state = entry.to_state;
            self.event_bus.publish(Event::TripTransitioned {
                dispatch_id: trip.dispatch_id,
                trip_id: trip.id,
                track: Track::Unit,
                from_state: entry.from_state,
                to_state,
                closed: false,
                entry: Box::new(entry),
                timestamp: now,
            });
            self.notifier.notify(trip.id, trip.dispatch_id, to_state);
            to_state
        });

        Ok(ResourcesOutcome {
            trip: trip.into(),
            dispatch_status: committed.dispatch_status,
            advanced_to,
        })
    }

    /// Explicitly close a trip at `vacio` / `descargado`
    pub async fn close_trip(
        &self,
        trip_id: Uuid,
        actor: Actor,
    ) -> Result<TransitionOutcome, SyncError> {
        let _guard = self.locks.acquire(trip_id).await;

        let mut trip = self.load_trip(trip_id).await?;
        let now = Utc::now();
        let expected_version = trip.version;
        let unit_before = trip.state_on(Track::Unit);

        let closed = self.machine.close(&mut trip, now).map_err(|e| {
            tracing::warn!("Trip {} cannot be closed by {}: {}", trip.id, actor, e);
            SyncError::TripNotClosable(e.to_string())
        })?;

        if !closed {
            tracing::debug!("Trip {} already closed", trip.id);
            let siblings = self.repository.list_trips(trip.dispatch_id).await?;
            return Ok(self.outcome(
                &trip,
                unit_before,
                summarize_trips(&siblings),
                actor.role,
                true,
                true,
            ));
        }

        let entry = TripLogEntry::new(
            trip.id,
            LogKind::Closure,
            unit_before,
            UnitState::ViajeCompletado.into(),
            &actor,
            None,
        )
        .at(now);

        let committed = self.commit(trip, expected_version, vec![entry.clone()]).await?;
        let trip = committed.trip;

        tracing::info!("Trip {} closed by {}", trip.id, actor);

        self.event_bus.publish(Event::TripTransitioned {
            dispatch_id: trip.dispatch_id,
            trip_id: trip.id,
            track: Track::Unit,
            from_state: unit_before,
            to_state: UnitState::ViajeCompletado.into(),
            closed: true,
            entry: Box::new(entry),
            timestamp: now,
        });
        self.notifier
            .notify(trip.id, trip.dispatch_id, UnitState::ViajeCompletado.into());

        Ok(self.outcome(
            &trip,
            unit_before,
            committed.dispatch_status,
            actor.role,
            true,
            false,
        ))
    }

    /// Legal next states of a trip for a role (all roles when `None`)
    pub async fn next_states(
        &self,
        trip_id: Uuid,
        role: Option<Role>,
    ) -> Result<(Trip, NextStates), SyncError> {
        let trip = self.load_trip(trip_id).await?;
        let next = self.machine.next_states(trip.state(), role);
        Ok((trip, next))
    }

    async fn load_trip(&self, trip_id: Uuid) -> Result<Trip, SyncError> {
        self.repository
            .load_trip(trip_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Trip {}", trip_id)))
    }

    /// Recompute the dispatch summary and write trip, log and summary at once
    async fn commit(
        &self,
        trip: Trip,
        expected_version: i64,
        log_entries: Vec<TripLogEntry>,
    ) -> Result<Committed, SyncError> {
        let siblings = self.repository.list_trips(trip.dispatch_id).await?;
        let previous_status = summarize_trips(&siblings);
        let dispatch_status = summarize_trips(
            siblings
                .iter()
                .map(|t| if t.id == trip.id { &trip } else { t }),
        );

        let change = TripChange {
            trip,
            expected_version,
            log_entries,
            dispatch_status,
        };

        let repo = self.repository.as_ref();
        let change = &change;
        let stored = self
            .persist("transition", move || repo.commit_change(change))
            .await
            .map_err(|e| {
                if let RepositoryError::StaleVersion { trip_id, .. } = &e {
                    tracing::warn!("Trip {} was modified concurrently", trip_id);
                }
                SyncError::from(e)
            })?;

        self.publish_status_change(
            stored.dispatch_id,
            previous_status,
            dispatch_status,
            stored.updated_at,
        );

        Ok(Committed {
            trip: stored,
            dispatch_status,
        })
    }

    /// Run a write, retrying database failures up to `persist_retries` times
    async fn persist<T, F, Fut>(&self, what: &str, mut write: F) -> Result<T, RepositoryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        let mut attempt = 0;
        loop {
            match write().await {
                Err(RepositoryError::Database(e)) if attempt < self.persist_retries => {
                    attempt += 1;
                    tracing::warn!("Persisting {} failed (attempt {}): {}", what, attempt, e);
                }
                result => return result,
            }
        }
    }

    fn publish_status_change(
        &self,
        dispatch_id: Uuid,
        from_status: TrackState,
        to_status: TrackState,
        at: DateTime<Utc>,
    ) {
        if from_status != to_status {
            self.event_bus.publish(Event::DispatchStatusChanged {
                dispatch_id,
                from_status,
                to_status,
                timestamp: at,
            });
        }
    }

    fn outcome(
        &self,
        trip: &Trip,
        previous_state: TrackState,
        dispatch_status: TrackState,
        role: Role,
        closed: bool,
        idempotent: bool,
    ) -> TransitionOutcome {
        TransitionOutcome {
            success: true,
            trip_id: trip.id,
            dispatch_id: trip.dispatch_id,
            track: previous_state.track(),
            previous_state,
            new_state: trip.state_on(previous_state.track()),
            unit_state: trip.unit_state,
            cargo_state: trip.cargo_state,
            dispatch_status,
            next_valid_states: self.machine.next_states(trip.state(), Some(role)),
            closed,
            idempotent,
        }
    }
}

/// Unit state the trip had right before the automatic close
fn unit_before_close(unit_before: UnitState, applied: TrackState) -> TrackState {
    match applied {
        TrackState::Unit(state) => state.into(),
        TrackState::Cargo(_) => unit_before.into(),
    }
}

fn closure_entry(trip: &Trip, from: TrackState, at: DateTime<Utc>) -> TripLogEntry {
    TripLogEntry::new(
        trip.id,
        LogKind::Closure,
        from,
        UnitState::ViajeCompletado.into(),
        &Actor::system(),
        None,
    )
    .at(at)
}
