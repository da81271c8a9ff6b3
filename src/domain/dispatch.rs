//! Dispatch domain model - a shipment order between two locations

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::state::{DualState, TrackState, UnitState};
use super::trip::Trip;

/// How the dispatch got its transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOrigin {
    /// Assigned by the coordinator to a known transport company
    #[default]
    Directo,
    /// Taken through a network offer; resource refs lag behind reality
    RedNodexia,
}

impl AssignmentOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentOrigin::Directo => "directo",
            AssignmentOrigin::RedNodexia => "red_nodexia",
        }
    }
}

impl fmt::Display for AssignmentOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssignmentOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directo" => Ok(AssignmentOrigin::Directo),
            "red_nodexia" => Ok(AssignmentOrigin::RedNodexia),
            _ => Err(format!("Unknown assignment origin: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Baja,
    #[default]
    Media,
    Alta,
    Urgente,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Baja => "baja",
            Priority::Media => "media",
            Priority::Alta => "alta",
            Priority::Urgente => "urgente",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baja" => Ok(Priority::Baja),
            "media" => Ok(Priority::Media),
            "alta" => Ok(Priority::Alta),
            "urgente" => Ok(Priority::Urgente),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// A dispatch ("despacho")
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispatch {
    pub id: Uuid,
    pub code: String,
    pub origin_location_id: Uuid,
    pub destination_location_id: Uuid,
    /// Plant-local scheduled date and time
    pub scheduled_at: NaiveDateTime,
    pub priority: Priority,
    pub assignment_origin: AssignmentOrigin,
    /// Mirror of the dominant trip state; written only by the synchronizer
    pub status: TrackState,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dispatch {
    pub fn new(req: &CreateDispatchRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            code: req.code.clone(),
            origin_location_id: req.origin_location_id,
            destination_location_id: req.destination_location_id,
            scheduled_at: req.scheduled_at,
            priority: req.priority.unwrap_or_default(),
            assignment_origin: req.assignment_origin.unwrap_or_default(),
            status: UnitState::Pendiente.into(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Request to create a new dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDispatchRequest {
    pub code: String,
    pub origin_location_id: Uuid,
    pub destination_location_id: Uuid,
    pub scheduled_at: NaiveDateTime,
    pub priority: Option<Priority>,
    pub assignment_origin: Option<AssignmentOrigin>,
}

/// Project a trip's dual state onto the single status shown on its dispatch.
///
/// While the unit is inside a plant and cargo work is under way, the cargo
/// state is the more telling one; everywhere else the unit state is.
pub fn project_summary(state: DualState) -> TrackState {
    use UnitState::*;

    if state.is_cancelled() {
        return Cancelado.into();
    }

    match (state.unit, state.cargo) {
        (ViajeCompletado, _) => ViajeCompletado.into(),
        (IngresadoOrigen | EnPlayaOrigen, cargo) if cargo.is_loading() => cargo.into(),
        (IngresadoDestino, cargo) if cargo.is_unloading() => cargo.into(),
        (unit, _) => unit.into(),
    }
}

/// Summary status over every trip a dispatch has had.
///
/// The most advanced non-cancelled trip wins. A dispatch whose trips are all
/// cancelled reads `cancelado`; one without trips reads `pendiente`.
pub fn summarize_trips<'a, I>(trips: I) -> TrackState
where
    I: IntoIterator<Item = &'a Trip>,
{
    let mut any = false;
    let dominant = trips
        .into_iter()
        .inspect(|_| any = true)
        .filter(|t| !t.is_deleted() && !t.state().is_cancelled())
        .max_by_key(|t| (t.state().progress_key(), t.trip_number));

    match dominant {
        Some(trip) => project_summary(trip.state()),
        None if any => UnitState::Cancelado.into(),
        None => UnitState::Pendiente.into(),
    }
}
