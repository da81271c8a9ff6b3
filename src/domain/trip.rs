//! Trip aggregate - one physical execution of a dispatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dispatch::AssignmentOrigin;
use super::state::{CargoState, DualState, Phase, Track, TrackState, UnitState};

/// A trip moves one truck from origin to destination on behalf of a dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: Uuid,
    pub dispatch_id: Uuid,
    pub trip_number: i32,
    pub unit_state: UnitState,
    pub cargo_state: CargoState,
    pub assignment_origin: AssignmentOrigin,
    pub transport_company_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub truck_id: Option<Uuid>,
    pub trailer_id: Option<Uuid>,
    pub milestones: Milestones,
    /// Bumped on every write; used for conditional updates
    pub version: i64,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// A freshly assigned trip; the trip number is settled on insert
    pub fn new(dispatch_id: Uuid, assignment_origin: AssignmentOrigin) -> Self {
        let now = Utc::now();
        let mut milestones = Milestones::default();
        milestones.stamp(UnitState::TransporteAsignado.into(), now);

        Self {
            id: Uuid::new_v4(),
            dispatch_id,
            trip_number: 0,
            unit_state: UnitState::TransporteAsignado,
            cargo_state: CargoState::Pendiente,
            assignment_origin,
            transport_company_id: None,
            driver_id: None,
            truck_id: None,
            trailer_id: None,
            milestones,
            version: 0,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_transport_company(mut self, company_id: Uuid) -> Self {
        self.transport_company_id = Some(company_id);
        self
    }

    pub fn state(&self) -> DualState {
        DualState::new(self.unit_state, self.cargo_state)
    }

    pub fn state_on(&self, track: Track) -> TrackState {
        self.state().on(track)
    }

    pub fn unit_phase(&self) -> Phase {
        self.unit_state.phase()
    }

    /// Neither cancelled nor completed
    pub fn is_active(&self) -> bool {
        !self.state().is_closed()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Network-assigned trips carry resource refs that are not trustworthy
    /// until the unit starts physically moving.
    pub fn resources_are_stale(&self) -> bool {
        self.assignment_origin == AssignmentOrigin::RedNodexia && !self.unit_phase().is_moving()
    }

    /// Driver as every reader should see it
    pub fn effective_driver_id(&self) -> Option<Uuid> {
        if self.resources_are_stale() {
            None
        } else {
            self.driver_id
        }
    }

    /// Truck as every reader should see it
    pub fn effective_truck_id(&self) -> Option<Uuid> {
        if self.resources_are_stale() {
            None
        } else {
            self.truck_id
        }
    }

    /// Move one track to `target` and stamp the milestone.
    ///
    /// Cancellation on either track cancels both. No validation happens here.
    pub fn set_state(&mut self, target: TrackState, at: DateTime<Utc>) {
        match target {
            TrackState::Unit(UnitState::Cancelado) | TrackState::Cargo(CargoState::Cancelado) => {
                self.unit_state = UnitState::Cancelado;
                self.cargo_state = CargoState::Cancelado;
            }
            TrackState::Unit(state) => self.unit_state = state,
            TrackState::Cargo(state) => self.cargo_state = state,
        }
        self.milestones.stamp(target, at);
        self.updated_at = at;
    }

    /// Set the system-only closing state
    pub fn close(&mut self, at: DateTime<Utc>) {
        self.set_state(UnitState::ViajeCompletado.into(), at);
    }
}

/// Timestamps of the first time each milestone was reached
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestones {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_assigned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truck_assigned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departed_to_origin_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrived_origin_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entered_origin_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yard_origin_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_origin_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departed_to_destination_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrived_destination_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entered_destination_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_destination_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emptied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_called_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unload_called_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unloading_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unloaded_at: Option<DateTime<Utc>>,
}

impl Milestones {
    fn slot(&mut self, state: TrackState) -> Option<&mut Option<DateTime<Utc>>> {
        use CargoState as C;
        use UnitState as U;

        let slot = match state {
            TrackState::Unit(U::Pendiente) | TrackState::Cargo(C::Pendiente) => return None,
            TrackState::Unit(U::TransporteAsignado) => &mut self.transport_assigned_at,
            TrackState::Unit(U::CamionAsignado) => &mut self.truck_assigned_at,
            TrackState::Unit(U::ConfirmadoChofer) => &mut self.driver_confirmed_at,
            TrackState::Unit(U::EnTransitoOrigen) => &mut self.departed_to_origin_at,
            TrackState::Unit(U::ArriboOrigen) => &mut self.arrived_origin_at,
            TrackState::Unit(U::IngresadoOrigen) => &mut self.entered_origin_at,
            TrackState::Unit(U::EnPlayaOrigen) => &mut self.yard_origin_at,
            TrackState::Unit(U::EgresoOrigen) => &mut self.left_origin_at,
            TrackState::Unit(U::EnTransitoDestino) => &mut self.departed_to_destination_at,
            TrackState::Unit(U::ArriboDestino) => &mut self.arrived_destination_at,
            TrackState::Unit(U::IngresadoDestino) => &mut self.entered_destination_at,
            TrackState::Unit(U::EgresoDestino) => &mut self.left_destination_at,
            TrackState::Unit(U::Vacio) => &mut self.emptied_at,
            TrackState::Unit(U::ViajeCompletado) => &mut self.completed_at,
            TrackState::Unit(U::Cancelado) | TrackState::Cargo(C::Cancelado) => {
                &mut self.cancelled_at
            }
            TrackState::Cargo(C::LlamadoCarga) => &mut self.load_called_at,
            TrackState::Cargo(C::Cargando) => &mut self.loading_started_at,
            TrackState::Cargo(C::Cargado) => &mut self.loaded_at,
            TrackState::Cargo(C::LlamadoDescarga) => &mut self.unload_called_at,
            TrackState::Cargo(C::Descargando) => &mut self.unloading_started_at,
            TrackState::Cargo(C::Descargado) => &mut self.unloaded_at,
        };
        Some(slot)
    }

    /// Record the first time `state` was reached; later stamps are ignored
    pub fn stamp(&mut self, state: TrackState, at: DateTime<Utc>) {
        if let Some(slot) = self.slot(state) {
            slot.get_or_insert(at);
        }
    }

    pub fn reached_at(&self, state: TrackState) -> Option<DateTime<Utc>> {
        self.clone().slot(state).and_then(|slot| *slot)
    }
}

/// Resource refs to set on a trip; `None` leaves the stored value as is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAssignment {
    pub driver_id: Option<Uuid>,
    pub truck_id: Option<Uuid>,
    pub trailer_id: Option<Uuid>,
}

impl ResourceAssignment {
    pub fn is_empty(&self) -> bool {
        self.driver_id.is_none() && self.truck_id.is_none() && self.trailer_id.is_none()
    }

    pub fn apply_to(&self, trip: &mut Trip) {
        if let Some(driver_id) = self.driver_id {
            trip.driver_id = Some(driver_id);
        }
        if let Some(truck_id) = self.truck_id {
            trip.truck_id = Some(truck_id);
        }
        if let Some(trailer_id) = self.trailer_id {
            trip.trailer_id = Some(trailer_id);
        }
    }
}

/// Trip with the staleness-aware view of its resources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripView {
    #[serde(flatten)]
    pub trip: Trip,
    pub effective_driver_id: Option<Uuid>,
    pub effective_truck_id: Option<Uuid>,
    pub resources_stale: bool,
}

impl From<Trip> for TripView {
    fn from(trip: Trip) -> Self {
        Self {
            effective_driver_id: trip.effective_driver_id(),
            effective_truck_id: trip.effective_truck_id(),
            resources_stale: trip.resources_are_stale(),
            trip,
        }
    }
}
