//! Transition table for the trip state machine

use crate::domain::{CargoState, Role, TrackState, UnitState};

/// How a transition may be requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Immediate successor on the same track
    Step,
    /// Skips intermediate states; restricted to the listed roles
    Shortcut,
    /// Set by the system only, never requested
    System,
}

/// Definition of a state transition
#[derive(Debug, Clone)]
pub struct TransitionDef {
    pub from: TrackState,
    pub to: TrackState,
    pub kind: TransitionKind,
    /// `None` means any role
    pub roles: Option<Vec<Role>>,
}

impl TransitionDef {
    pub fn step(from: impl Into<TrackState>, to: impl Into<TrackState>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: TransitionKind::Step,
            roles: None,
        }
    }

    pub fn shortcut(from: impl Into<TrackState>, to: impl Into<TrackState>) -> Self {
        Self {
            kind: TransitionKind::Shortcut,
            ..Self::step(from, to)
        }
    }

    pub fn system(from: impl Into<TrackState>, to: impl Into<TrackState>) -> Self {
        Self {
            kind: TransitionKind::System,
            roles: Some(vec![Role::Sistema]),
            ..Self::step(from, to)
        }
    }

    pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn allows(&self, role: Role) -> bool {
        self.roles
            .as_ref()
            .map(|roles| roles.contains(&role))
            .unwrap_or(true)
    }
}

/// Build every transition the trip lifecycle knows about.
///
/// Cancellation is not listed: it is legal from any non-terminal state.
pub fn build_transitions() -> Vec<TransitionDef> {
    use CargoState::*;
    use Role::*;
    use UnitState::*;

    let gate_roles = vec![ControlAcceso, Supervisor, Admin];

    vec![
        // Assignment
        TransitionDef::step(UnitState::Pendiente, TransporteAsignado),
        TransitionDef::step(TransporteAsignado, CamionAsignado),
        TransitionDef::step(CamionAsignado, ConfirmadoChofer),
        // Transit to origin
        TransitionDef::step(ConfirmadoChofer, EnTransitoOrigen),
        TransitionDef::step(EnTransitoOrigen, ArriboOrigen),
        // At origin
        TransitionDef::step(ArriboOrigen, IngresadoOrigen),
        TransitionDef::step(IngresadoOrigen, EnPlayaOrigen),
        TransitionDef::step(EnPlayaOrigen, EgresoOrigen),
        // Transit to destination
        TransitionDef::step(EgresoOrigen, EnTransitoDestino),
        TransitionDef::step(EnTransitoDestino, ArriboDestino),
        // At destination
        TransitionDef::step(ArriboDestino, IngresadoDestino),
        TransitionDef::step(IngresadoDestino, EgresoDestino),
        // Closure
        TransitionDef::step(EgresoDestino, Vacio),
        TransitionDef::system(Vacio, ViajeCompletado),
        // Cargo, loading
        TransitionDef::step(CargoState::Pendiente, LlamadoCarga),
        TransitionDef::step(LlamadoCarga, Cargando),
        TransitionDef::step(Cargando, Cargado),
        // Cargo, unloading
        TransitionDef::step(Cargado, LlamadoDescarga),
        TransitionDef::step(LlamadoDescarga, Descargando),
        TransitionDef::step(Descargando, Descargado),
        // Gate already logged the entry
        TransitionDef::shortcut(ConfirmadoChofer, IngresadoOrigen).with_roles(gate_roles.clone()),
        TransitionDef::shortcut(EnTransitoOrigen, IngresadoOrigen).with_roles(gate_roles.clone()),
        TransitionDef::shortcut(EnTransitoDestino, IngresadoDestino).with_roles(gate_roles),
        // Driver starts the trip without confirming first
        TransitionDef::shortcut(CamionAsignado, EnTransitoOrigen).with_roles(vec![Chofer, Admin]),
    ]
}

/// Targets reachable from `state` by table entries, in table order
pub fn targets_from(state: TrackState) -> Vec<TrackState> {
    build_transitions()
        .into_iter()
        .filter(|t| t.from == state)
        .map(|t| t.to)
        .collect()
}
