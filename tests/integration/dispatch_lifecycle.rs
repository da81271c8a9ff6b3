//! A dispatch from creation to a completed trip, triaged along the way

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, Offset, Utc};
use uuid::Uuid;

use nodexia::db::{self, init_database, SqliteRepository};
use nodexia::domain::{
    Actor, AssignmentOrigin, CargoState, CreateDispatchRequest, Dispatch, LogKind, Priority,
    ResourceAssignment, Role, TrackState, Trip, UnitState,
};
use nodexia::events::{Event, EventBus};
use nodexia::notifications::NotificationTrigger;
use nodexia::sync::{SyncError, Synchronizer, TransitionCommand};
use nodexia::triage::{current_trip, Bucket, Triage};

fn scheduled() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 10)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

struct World {
    pool: sqlx::SqlitePool,
    sync: Synchronizer,
    bus: EventBus,
    triage: Triage,
}

impl World {
    async fn new() -> Self {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let bus = EventBus::new();
        let notifier = NotificationTrigger::event_bus_only(bus.clone());
        let sync = Synchronizer::new(
            Arc::new(SqliteRepository::new(pool.clone())),
            notifier,
            bus.clone(),
        );

        Self {
            pool,
            sync,
            bus,
            triage: Triage::new(Duration::minutes(120), Utc.fix()),
        }
    }

    async fn dispatch(&self, code: &str, origin: AssignmentOrigin) -> Dispatch {
        db::create_dispatch(
            &self.pool,
            &CreateDispatchRequest {
                code: code.to_string(),
                origin_location_id: Uuid::new_v4(),
                destination_location_id: Uuid::new_v4(),
                scheduled_at: scheduled(),
                priority: Some(Priority::Urgente),
                assignment_origin: Some(origin),
            },
        )
        .await
        .unwrap()
    }

    async fn bucket_at(&self, dispatch_id: Uuid, now: NaiveDateTime) -> Bucket {
        let dispatch = db::get_dispatch(&self.pool, dispatch_id)
            .await
            .unwrap()
            .unwrap();
        let trips: Vec<Trip> = db::list_trips_for_dispatch(&self.pool, dispatch_id)
            .await
            .unwrap();
        self.triage.bucket(&dispatch, &trips, now)
    }

    async fn status(&self, dispatch_id: Uuid) -> TrackState {
        db::get_dispatch(&self.pool, dispatch_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    async fn advance(&self, trip_id: Uuid, target: impl Into<TrackState>, actor: &Actor) {
        self.sync
            .apply_transition(TransitionCommand::new(trip_id, target, actor.clone()))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_full_dispatch_lifecycle() {
    let world = World::new().await;
    let mut events = world.bus.subscribe();

    let coordinator = Actor::new("coord-1", Role::Coordinador);
    let carrier = Actor::new("carrier-1", Role::CoordinadorTransporte);
    let driver = Actor::new("driver-1", Role::Chofer);
    let gate = Actor::new("gate-1", Role::ControlAcceso);
    let yard = Actor::new("yard-1", Role::Supervisor);

    let on_time = scheduled() + Duration::minutes(30);
    let late = scheduled() + Duration::hours(3);

    let dispatch = world.dispatch("DSP-2026-001", AssignmentOrigin::Directo).await;
    assert_eq!(world.bucket_at(dispatch.id, on_time).await, Bucket::Pending);
    assert_eq!(world.bucket_at(dispatch.id, late).await, Bucket::Expired);

    // Transport company takes the dispatch, then names driver and truck
    let trip = world
        .sync
        .assign_transport(dispatch.id, Some(Uuid::new_v4()), coordinator.clone(), None)
        .await
        .unwrap();
    assert_eq!(world.bucket_at(dispatch.id, on_time).await, Bucket::Pending);

    let outcome = world
        .sync
        .assign_resources(
            trip.id,
            ResourceAssignment {
                driver_id: Some(Uuid::new_v4()),
                truck_id: Some(Uuid::new_v4()),
                trailer_id: Some(Uuid::new_v4()),
            },
            carrier.clone(),
            Some("semi 40ft".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome.advanced_to,
        Some(TrackState::Unit(UnitState::CamionAsignado))
    );
    assert_eq!(world.bucket_at(dispatch.id, on_time).await, Bucket::Assigned);
    assert_eq!(world.bucket_at(dispatch.id, late).await, Bucket::Delayed);

    // Driver heads out without confirming first
    world.advance(trip.id, UnitState::EnTransitoOrigen, &driver).await;
    assert_eq!(world.bucket_at(dispatch.id, on_time).await, Bucket::InProgress);
    assert_eq!(world.bucket_at(dispatch.id, late).await, Bucket::Delayed);

    // Gate lets the truck straight in
    world.advance(trip.id, UnitState::IngresadoOrigen, &gate).await;
    world.advance(trip.id, UnitState::EnPlayaOrigen, &yard).await;
    assert_eq!(world.bucket_at(dispatch.id, late).await, Bucket::InProgress);

    for state in [CargoState::LlamadoCarga, CargoState::Cargando] {
        world.advance(trip.id, state, &yard).await;
    }
    assert_eq!(
        world.status(dispatch.id).await,
        TrackState::Cargo(CargoState::Cargando)
    );
    world.advance(trip.id, CargoState::Cargado, &yard).await;
    world.advance(trip.id, UnitState::EgresoOrigen, &gate).await;
    world.advance(trip.id, UnitState::EnTransitoDestino, &driver).await;
    assert_eq!(
        world.status(dispatch.id).await,
        TrackState::Unit(UnitState::EnTransitoDestino)
    );

    world.advance(trip.id, UnitState::IngresadoDestino, &gate).await;
    for state in [
        CargoState::LlamadoDescarga,
        CargoState::Descargando,
        CargoState::Descargado,
    ] {
        world.advance(trip.id, state, &yard).await;
    }
    world.advance(trip.id, UnitState::EgresoDestino, &gate).await;

    let last = world
        .sync
        .apply_transition(TransitionCommand::new(trip.id, UnitState::Vacio, driver.clone()))
        .await
        .unwrap();
    assert!(last.closed);
    assert_eq!(
        world.status(dispatch.id).await,
        TrackState::Unit(UnitState::ViajeCompletado)
    );
    assert_eq!(world.bucket_at(dispatch.id, late).await, Bucket::Completed);

    // Every skipped milestone carries a timestamp
    let stored = db::get_trip(&world.pool, trip.id).await.unwrap().unwrap();
    assert!(stored.milestones.driver_confirmed_at.is_some());
    assert!(stored.milestones.arrived_origin_at.is_some());
    assert!(stored.milestones.arrived_destination_at.is_some());
    assert!(stored.milestones.completed_at.is_some());

    let log = db::list_trip_log(&world.pool, trip.id).await.unwrap();
    assert_eq!(log.first().unwrap().kind, LogKind::Assignment);
    assert_eq!(log.last().unwrap().kind, LogKind::Closure);
    assert!(log.iter().any(|e| e.annotation.ends_with("semi 40ft")));

    let mut transitions = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::TripTransitioned { .. }) {
            transitions += 1;
        }
    }
    assert!(transitions >= 15);

    let again = world
        .sync
        .assign_transport(dispatch.id, None, coordinator, None)
        .await;
    assert!(matches!(again, Err(SyncError::DispatchClosed(_))));
}

#[tokio::test]
async fn test_cancelled_trip_is_replaced() {
    let world = World::new().await;
    let coordinator = Actor::new("coord-1", Role::Coordinador);
    let dispatch = world.dispatch("DSP-2026-002", AssignmentOrigin::Directo).await;

    let first = world
        .sync
        .assign_transport(dispatch.id, None, coordinator.clone(), None)
        .await
        .unwrap();
    world
        .sync
        .apply_transition(
            TransitionCommand::new(first.id, UnitState::Cancelado, coordinator.clone())
                .with_observation("truck broke down"),
        )
        .await
        .unwrap();
    assert_eq!(
        world.bucket_at(dispatch.id, scheduled()).await,
        Bucket::Completed
    );

    let second = world
        .sync
        .assign_transport(dispatch.id, None, coordinator, None)
        .await
        .unwrap();
    assert_eq!(second.trip_number, 2);

    let trips = db::list_trips_for_dispatch(&world.pool, dispatch.id)
        .await
        .unwrap();
    assert_eq!(current_trip(&trips).unwrap().id, second.id);
    assert_eq!(
        world.bucket_at(dispatch.id, scheduled()).await,
        Bucket::Pending
    );
}

#[tokio::test]
async fn test_network_assigned_resources_stay_hidden_until_moving() {
    let world = World::new().await;
    let coordinator = Actor::new("coord-1", Role::Coordinador);
    let driver = Actor::new("driver-1", Role::Chofer);
    let dispatch = world.dispatch("DSP-2026-003", AssignmentOrigin::RedNodexia).await;

    let trip = world
        .sync
        .assign_transport(dispatch.id, None, coordinator.clone(), None)
        .await
        .unwrap();
    let driver_id = Uuid::new_v4();
    world
        .sync
        .assign_resources(
            trip.id,
            ResourceAssignment {
                driver_id: Some(driver_id),
                truck_id: Some(Uuid::new_v4()),
                trailer_id: None,
            },
            coordinator,
            None,
        )
        .await
        .unwrap();

    let now = scheduled();
    assert_eq!(world.bucket_at(dispatch.id, now).await, Bucket::Pending);

    world.advance(trip.id, UnitState::ConfirmadoChofer, &driver).await;
    world.advance(trip.id, UnitState::EnTransitoOrigen, &driver).await;
    assert_eq!(world.bucket_at(dispatch.id, now).await, Bucket::InProgress);

    let stored = db::get_trip(&world.pool, trip.id).await.unwrap().unwrap();
    assert_eq!(stored.effective_driver_id(), Some(driver_id));
}

#[tokio::test]
async fn test_soft_deleted_dispatch_hides_its_trips() {
    let world = World::new().await;
    let coordinator = Actor::new("coord-1", Role::Coordinador);
    let dispatch = world.dispatch("DSP-2026-004", AssignmentOrigin::Directo).await;

    let trip = world
        .sync
        .assign_transport(dispatch.id, None, coordinator.clone(), None)
        .await
        .unwrap();

    assert_eq!(
        db::delete_dispatch(&world.pool, dispatch.id).await.unwrap(),
        db::DeleteOutcome::SoftDeleted
    );
    assert!(db::get_dispatch(&world.pool, dispatch.id)
        .await
        .unwrap()
        .is_none());

    let result = world
        .sync
        .apply_transition(TransitionCommand::new(
            trip.id,
            UnitState::CamionAsignado,
            coordinator,
        ))
        .await;
    assert!(matches!(result, Err(SyncError::NotFound(_))));
}
