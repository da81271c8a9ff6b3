//! Trip State Machine implementation

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    CargoState, DualState, Phase, Role, Track, TrackState, Trip, UnitState,
};
use crate::state_machine::transitions::{build_transitions, TransitionDef, TransitionKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Trip is closed at {state}; no further transitions are allowed")]
    Terminal { state: TrackState },

    #[error("{target} is set by the system and cannot be requested")]
    SystemOnly { target: TrackState },

    #[error("{target} is not a state of the {track} track")]
    WrongTrack { target: TrackState, track: Track },

    #[error("Cannot move from {from} to {to}: not the next state")]
    NotNextState { from: TrackState, to: TrackState },

    #[error("Role {role} may not move from {from} to {to}")]
    RoleNotPermitted {
        from: TrackState,
        to: TrackState,
        role: Role,
    },

    #[error("unit not yet at required phase: {target} needs {required}, unit is at {current}")]
    UnitPhaseNotReached {
        target: TrackState,
        required: Phase,
        current: Phase,
    },

    #[error("Trip cannot be closed while at {unit}/{cargo}")]
    NotClosable { unit: UnitState, cargo: CargoState },
}

/// Allow/deny answer in the shape callers render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<Result<(), TransitionError>> for Validation {
    fn from(result: Result<(), TransitionError>) -> Self {
        match result {
            Ok(()) => Self {
                allowed: true,
                reason: None,
            },
            Err(e) => Self {
                allowed: false,
                reason: Some(e.to_string()),
            },
        }
    }
}

/// Legal next states on both tracks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStates {
    pub unit: Vec<TrackState>,
    pub cargo: Vec<TrackState>,
}

impl NextStates {
    pub fn on(&self, track: Track) -> &[TrackState] {
        match track {
            Track::Unit => &self.unit,
            Track::Cargo => &self.cargo,
        }
    }
}

/// What a successful `apply` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedTransition {
    pub previous: TrackState,
    pub new: TrackState,
    /// The trip reached `viaje_completado` as a consequence
    pub closed: bool,
}

/// The trip state machine validates and applies transitions
pub struct TripStateMachine {
    transitions: HashMap<TrackState, Vec<TransitionDef>>,
}

impl Default for TripStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TripStateMachine {
    pub fn new() -> Self {
        let mut transitions: HashMap<TrackState, Vec<TransitionDef>> = HashMap::new();

        for def in build_transitions() {
            transitions.entry(def.from).or_default().push(def);
        }

        Self { transitions }
    }

    fn definition(&self, from: TrackState, to: TrackState) -> Option<&TransitionDef> {
        self.transitions
            .get(&from)
            .and_then(|defs| defs.iter().find(|d| d.to == to))
    }

    /// Check a requested transition without applying it
    pub fn check(
        &self,
        state: DualState,
        target: TrackState,
        role: Role,
    ) -> Result<(), TransitionError> {
        let current = state.on(target.track());

        if state.is_cancelled() {
            return Err(TransitionError::Terminal {
                state: UnitState::Cancelado.into(),
            });
        }
        if state.is_completed() {
            return Err(TransitionError::Terminal {
                state: UnitState::ViajeCompletado.into(),
            });
        }
        if current.is_terminal() {
            return Err(TransitionError::Terminal { state: current });
        }

        // Operator override
        if target.is_cancelled() {
            return Ok(());
        }

        if target == TrackState::Unit(UnitState::ViajeCompletado) {
            return Err(TransitionError::SystemOnly { target });
        }

        let def = self
            .definition(current, target)
            .ok_or(TransitionError::NotNextState {
                from: current,
                to: target,
            })?;

        match def.kind {
            TransitionKind::System => return Err(TransitionError::SystemOnly { target }),
            TransitionKind::Shortcut if !def.allows(role) => {
                return Err(TransitionError::RoleNotPermitted {
                    from: current,
                    to: target,
                    role,
                });
            }
            _ => {}
        }

        if let TrackState::Cargo(cargo) = target {
            let required = cargo.governing_phase();
            let unit_phase = state.unit_phase();
            if required.number() > unit_phase.number() {
                return Err(TransitionError::UnitPhaseNotReached {
                    target,
                    required,
                    current: unit_phase,
                });
            }
        }

        Ok(())
    }

    /// Validate `target` on `track` from the given dual state
    pub fn validate_transition(
        &self,
        state: DualState,
        target: TrackState,
        track: Track,
        role: Role,
    ) -> Validation {
        if target.track() != track && !target.is_cancelled() {
            return Err(TransitionError::WrongTrack { target, track }).into();
        }
        self.check(state, target, role).into()
    }

    /// States that may be requested next on `track`, in presentation order:
    /// successor, shortcuts usable by `role` (all of them when `role` is
    /// `None`), then `cancelado`.
    pub fn next_valid_states(
        &self,
        state: DualState,
        track: Track,
        role: Option<Role>,
    ) -> Vec<TrackState> {
        let current = state.on(track);
        if state.is_closed() || current.is_terminal() {
            return Vec::new();
        }

        let mut next: Vec<TrackState> = self
            .transitions
            .get(&current)
            .map(|defs| {
                defs.iter()
                    .filter(|def| match def.kind {
                        TransitionKind::Step => true,
                        TransitionKind::Shortcut => role.map(|r| def.allows(r)).unwrap_or(true),
                        TransitionKind::System => false,
                    })
                    .filter(|def| match def.to {
                        TrackState::Cargo(cargo) => {
                            cargo.governing_phase().number() <= state.unit_phase().number()
                        }
                        TrackState::Unit(_) => true,
                    })
                    .map(|def| def.to)
                    .collect()
            })
            .unwrap_or_default();

        next.push(TrackState::cancelled(track));
        next
    }

    pub fn next_states(&self, state: DualState, role: Option<Role>) -> NextStates {
        NextStates {
            unit: self.next_valid_states(state, Track::Unit, role),
            cargo: self.next_valid_states(state, Track::Cargo, role),
        }
    }

    /// Validate and apply a transition to a trip.
    ///
    /// Milestones skipped by a shortcut are stamped with the same instant.
    /// When the move leaves the unit at `vacio` and the cargo at `descargado`
    /// the trip is closed on the spot.
    pub fn apply(
        &self,
        trip: &mut Trip,
        target: TrackState,
        role: Role,
        at: DateTime<Utc>,
    ) -> Result<AppliedTransition, TransitionError> {
        self.check(trip.state(), target, role)?;

        let previous = trip.state_on(target.track());

        if let (TrackState::Unit(from), TrackState::Unit(to)) = (previous, target) {
            for skipped in skipped_between(from, to) {
                trip.milestones.stamp(skipped.into(), at);
            }
        }
        trip.set_state(target, at);

        let closed = trip.state().ready_to_close();
        if closed {
            trip.close(at);
        }

        Ok(AppliedTransition {
            previous,
            new: target,
            closed,
        })
    }

    /// Explicit close. `Ok(false)` when the trip was already completed.
    pub fn close(&self, trip: &mut Trip, at: DateTime<Utc>) -> Result<bool, TransitionError> {
        let state = trip.state();
        if state.is_completed() {
            return Ok(false);
        }
        if state.is_cancelled() {
            return Err(TransitionError::Terminal {
                state: UnitState::Cancelado.into(),
            });
        }
        if !state.ready_to_close() {
            return Err(TransitionError::NotClosable {
                unit: state.unit,
                cargo: state.cargo,
            });
        }

        trip.close(at);
        Ok(true)
    }
}

/// Unit states strictly between `from` and `to`
fn skipped_between(from: UnitState, to: UnitState) -> Vec<UnitState> {
    match (from.ordinal(), to.ordinal()) {
        (Some(a), Some(b)) if b > a + 1 => UnitState::SEQUENCE[a + 1..b].to_vec(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AssignmentOrigin;
    use uuid::Uuid;

    fn dual(unit: UnitState, cargo: CargoState) -> DualState {
        DualState::new(unit, cargo)
    }

    fn test_trip(unit: UnitState, cargo: CargoState) -> Trip {
        let mut trip = Trip::new(Uuid::new_v4(), AssignmentOrigin::Directo);
        trip.unit_state = unit;
        trip.cargo_state = cargo;
        trip
    }

    #[test]
    fn test_successor_is_allowed() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::EnTransitoOrigen, CargoState::Pendiente);

        let validation = machine.validate_transition(
            state,
            TrackState::from(UnitState::ArriboOrigen),
            Track::Unit,
            Role::Chofer,
        );
        assert!(validation.allowed);
        assert!(validation.reason.is_none());
    }

    #[test]
    fn test_skipping_is_rejected() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::TransporteAsignado, CargoState::Pendiente);

        let result = machine.check(state, TrackState::from(UnitState::EnTransitoOrigen), Role::Admin);
        assert!(matches!(result, Err(TransitionError::NotNextState { .. })));
    }

    #[test]
    fn test_backwards_is_rejected() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::ArriboOrigen, CargoState::Pendiente);

        let result = machine.check(state, TrackState::from(UnitState::EnTransitoOrigen), Role::Admin);
        assert!(result.is_err());
    }

    #[test]
    fn test_cancel_allowed_from_every_non_terminal_state() {
        let machine = TripStateMachine::new();

        for unit in UnitState::SEQUENCE {
            for cargo in CargoState::SEQUENCE {
                let state = dual(unit, cargo);
                for track in [Track::Unit, Track::Cargo] {
                    let current = state.on(track);
                    let validation = machine.validate_transition(
                        state,
                        TrackState::cancelled(track),
                        track,
                        Role::Coordinador,
                    );
                    let terminal = state.is_closed() || current.is_terminal();
                    assert_eq!(validation.allowed, !terminal, "{}/{} on {}", unit, cargo, track);
                }
            }
        }
    }

    #[test]
    fn test_cancelled_trip_cannot_advance() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::Cancelado, CargoState::Cancelado);

        assert!(matches!(
            machine.check(state, TrackState::from(UnitState::ArriboOrigen), Role::Admin),
            Err(TransitionError::Terminal { .. })
        ));
        assert!(machine.check(state, TrackState::from(CargoState::Cancelado), Role::Admin).is_err());
    }

    #[test]
    fn test_cargo_ahead_of_unit_phase_is_rejected() {
        let machine = TripStateMachine::new();

        for unit in UnitState::SEQUENCE {
            for target in CargoState::SEQUENCE.iter().skip(1) {
                let unit_phase = unit.phase().number();
                if target.governing_phase().number() <= unit_phase {
                    continue;
                }
                for cargo in CargoState::SEQUENCE {
                    let state = dual(unit, cargo);
                    let validation = machine.validate_transition(
                        state,
                        (*target).into(),
                        Track::Cargo,
                        Role::Admin,
                    );
                    assert!(!validation.allowed, "{} allowed at {}", target, unit);
                }
            }
        }
    }

    #[test]
    fn test_cargando_while_driver_confirmed_is_rejected() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::ConfirmadoChofer, CargoState::LlamadoCarga);

        let result = machine.check(state, TrackState::from(CargoState::Cargando), Role::Supervisor);
        assert_eq!(
            result,
            Err(TransitionError::UnitPhaseNotReached {
                target: TrackState::from(CargoState::Cargando),
                required: Phase::AtOrigin,
                current: Phase::Assignment,
            })
        );
        assert!(result
            .unwrap_err()
            .to_string()
            .starts_with("unit not yet at required phase"));
    }

    #[test]
    fn test_loading_inside_origin() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::IngresadoOrigen, CargoState::Pendiente);

        assert!(machine
            .check(state, TrackState::from(CargoState::LlamadoCarga), Role::Supervisor)
            .is_ok());
    }

    #[test]
    fn test_unloading_needs_destination() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::EnTransitoDestino, CargoState::Cargado);

        assert!(matches!(
            machine.check(state, TrackState::from(CargoState::LlamadoDescarga), Role::Supervisor),
            Err(TransitionError::UnitPhaseNotReached { .. })
        ));

        let state = dual(UnitState::IngresadoDestino, CargoState::Cargado);
        assert!(machine
            .check(state, TrackState::from(CargoState::LlamadoDescarga), Role::Supervisor)
            .is_ok());
    }

    #[test]
    fn test_viaje_completado_is_never_requestable() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::Vacio, CargoState::Descargado);

        assert_eq!(
            machine.check(state, TrackState::from(UnitState::ViajeCompletado), Role::Sistema),
            Err(TransitionError::SystemOnly {
                target: TrackState::from(UnitState::ViajeCompletado)
            })
        );
    }

    #[test]
    fn test_gate_shortcut_requires_role() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::ConfirmadoChofer, CargoState::Pendiente);
        let target: TrackState = TrackState::from(UnitState::IngresadoOrigen);

        assert!(machine.check(state, target, Role::ControlAcceso).is_ok());
        assert!(machine.check(state, target, Role::Supervisor).is_ok());
        assert!(matches!(
            machine.check(state, target, Role::Chofer),
            Err(TransitionError::RoleNotPermitted { .. })
        ));
    }

    #[test]
    fn test_wrong_track_is_rejected() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::IngresadoOrigen, CargoState::Pendiente);

        let validation = machine.validate_transition(
            state,
            TrackState::from(CargoState::LlamadoCarga),
            Track::Unit,
            Role::Admin,
        );
        assert!(!validation.allowed);
    }

    #[test]
    fn test_next_valid_states_successor_then_cancel() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::ArriboOrigen, CargoState::Pendiente);

        assert_eq!(
            machine.next_valid_states(state, Track::Unit, Some(Role::Chofer)),
            vec![
                TrackState::from(UnitState::IngresadoOrigen),
                TrackState::from(UnitState::Cancelado)
            ]
        );
    }

    #[test]
    fn test_next_valid_states_includes_shortcuts_for_role() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::ConfirmadoChofer, CargoState::Pendiente);

        let for_gate = machine.next_valid_states(state, Track::Unit, Some(Role::ControlAcceso));
        assert_eq!(
            for_gate,
            vec![
                TrackState::from(UnitState::EnTransitoOrigen),
                TrackState::from(UnitState::IngresadoOrigen),
                TrackState::from(UnitState::Cancelado)
            ]
        );

        let for_driver = machine.next_valid_states(state, Track::Unit, Some(Role::Chofer));
        assert!(!for_driver.contains(&TrackState::from(UnitState::IngresadoOrigen)));

        let for_anyone = machine.next_valid_states(state, Track::Unit, None);
        assert!(for_anyone.contains(&TrackState::from(UnitState::IngresadoOrigen)));
    }

    #[test]
    fn test_next_valid_states_hides_cargo_ahead_of_unit() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::ConfirmadoChofer, CargoState::Pendiente);

        assert_eq!(
            machine.next_valid_states(state, Track::Cargo, None),
            vec![TrackState::from(CargoState::Cancelado)]
        );
    }

    #[test]
    fn test_next_valid_states_empty_when_closed() {
        let machine = TripStateMachine::new();
        let next = machine.next_states(dual(UnitState::ViajeCompletado, CargoState::Descargado), None);
        assert!(next.unit.is_empty());
        assert!(next.cargo.is_empty());
    }

    #[test]
    fn test_vacio_only_offers_cancel() {
        let machine = TripStateMachine::new();
        let state = dual(UnitState::Vacio, CargoState::Descargando);

        assert_eq!(
            machine.next_valid_states(state, Track::Unit, None),
            vec![TrackState::from(UnitState::Cancelado)]
        );
    }

    #[test]
    fn test_apply_sets_state_and_milestone() {
        let machine = TripStateMachine::new();
        let mut trip = test_trip(UnitState::CamionAsignado, CargoState::Pendiente);
        let now = Utc::now();

        let applied = machine
            .apply(&mut trip, TrackState::from(UnitState::ConfirmadoChofer), Role::Chofer, now)
            .unwrap();

        assert_eq!(applied.previous, TrackState::from(UnitState::CamionAsignado));
        assert_eq!(applied.new, TrackState::from(UnitState::ConfirmadoChofer));
        assert!(!applied.closed);
        assert_eq!(trip.unit_state, UnitState::ConfirmadoChofer);
        assert_eq!(trip.milestones.driver_confirmed_at, Some(now));
    }

    #[test]
    fn test_apply_shortcut_stamps_skipped_milestones() {
        let machine = TripStateMachine::new();
        let mut trip = test_trip(UnitState::ConfirmadoChofer, CargoState::Pendiente);
        let now = Utc::now();

        machine
            .apply(&mut trip, TrackState::from(UnitState::IngresadoOrigen), Role::ControlAcceso, now)
            .unwrap();

        assert_eq!(trip.unit_state, UnitState::IngresadoOrigen);
        assert_eq!(trip.milestones.departed_to_origin_at, Some(now));
        assert_eq!(trip.milestones.arrived_origin_at, Some(now));
        assert_eq!(trip.milestones.entered_origin_at, Some(now));
    }

    #[test]
    fn test_apply_auto_closes_when_both_tracks_done() {
        let machine = TripStateMachine::new();
        let mut trip = test_trip(UnitState::EgresoDestino, CargoState::Descargado);

        let applied = machine
            .apply(&mut trip, TrackState::from(UnitState::Vacio), Role::Chofer, Utc::now())
            .unwrap();

        assert!(applied.closed);
        assert_eq!(trip.unit_state, UnitState::ViajeCompletado);
        assert!(trip.milestones.completed_at.is_some());
    }

    #[test]
    fn test_apply_cargo_last_also_closes() {
        let machine = TripStateMachine::new();
        let mut trip = test_trip(UnitState::Vacio, CargoState::Descargando);

        let applied = machine
            .apply(&mut trip, TrackState::from(CargoState::Descargado), Role::Supervisor, Utc::now())
            .unwrap();

        assert!(applied.closed);
        assert_eq!(trip.unit_state, UnitState::ViajeCompletado);
    }

    #[test]
    fn test_apply_rejected_leaves_trip_untouched() {
        let machine = TripStateMachine::new();
        let mut trip = test_trip(UnitState::ConfirmadoChofer, CargoState::Pendiente);
        let before = trip.clone();

        let result = machine.apply(&mut trip, TrackState::from(CargoState::LlamadoCarga), Role::Admin, Utc::now());

        assert!(result.is_err());
        assert_eq!(trip.state(), before.state());
        assert_eq!(trip.milestones, before.milestones);
    }

    #[test]
    fn test_close() {
        let machine = TripStateMachine::new();

        let mut trip = test_trip(UnitState::EgresoDestino, CargoState::Descargado);
        assert!(matches!(
            machine.close(&mut trip, Utc::now()),
            Err(TransitionError::NotClosable { .. })
        ));

        let mut trip = test_trip(UnitState::Vacio, CargoState::Descargado);
        assert_eq!(machine.close(&mut trip, Utc::now()), Ok(true));
        assert_eq!(machine.close(&mut trip, Utc::now()), Ok(false));

        let mut trip = test_trip(UnitState::Cancelado, CargoState::Cancelado);
        assert!(machine.close(&mut trip, Utc::now()).is_err());
    }
}
