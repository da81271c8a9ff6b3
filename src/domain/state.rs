//! Trip state catalog: the unit track, the cargo track and their phases

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two parallel tracks a trip advances on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    /// Vehicle movement
    #[serde(alias = "unidad")]
    Unit,
    /// Loading and unloading
    #[serde(alias = "carga")]
    Cargo,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Unit => "unit",
            Track::Cargo => "cargo",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Track {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit" | "unidad" => Ok(Track::Unit),
            "cargo" | "carga" => Ok(Track::Cargo),
            _ => Err(format!("Unknown track: {}", s)),
        }
    }
}

/// Lifecycle phases, numbered 0..=6 on the unit track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Creation,
    Assignment,
    TransitToOrigin,
    AtOrigin,
    TransitToDestination,
    AtDestination,
    Closure,
    Cancelled,
}

impl Phase {
    /// Phase number, `None` for the cancellation phase
    pub fn number(&self) -> Option<u8> {
        match self {
            Phase::Creation => Some(0),
            Phase::Assignment => Some(1),
            Phase::TransitToOrigin => Some(2),
            Phase::AtOrigin => Some(3),
            Phase::TransitToDestination => Some(4),
            Phase::AtDestination => Some(5),
            Phase::Closure => Some(6),
            Phase::Cancelled => None,
        }
    }

    /// Whether the vehicle is physically on the move or at a plant (phases 2..=6)
    pub fn is_moving(&self) -> bool {
        matches!(self.number(), Some(2..=6))
    }

    /// Whether the vehicle is inside a plant (origin or destination)
    pub fn is_at_plant(&self) -> bool {
        matches!(self, Phase::AtOrigin | Phase::AtDestination)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Creation => write!(f, "creation"),
            Phase::Assignment => write!(f, "assignment"),
            Phase::TransitToOrigin => write!(f, "transit_to_origin"),
            Phase::AtOrigin => write!(f, "at_origin"),
            Phase::TransitToDestination => write!(f, "transit_to_destination"),
            Phase::AtDestination => write!(f, "at_destination"),
            Phase::Closure => write!(f, "closure"),
            Phase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Unit (vehicle movement) states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    // Creation
    Pendiente,
    // Assignment
    TransporteAsignado,
    CamionAsignado,
    ConfirmadoChofer,
    // Transit to origin
    EnTransitoOrigen,
    ArriboOrigen,
    // At origin
    IngresadoOrigen,
    EnPlayaOrigen,
    EgresoOrigen,
    // Transit to destination
    EnTransitoDestino,
    ArriboDestino,
    // At destination
    IngresadoDestino,
    EgresoDestino,
    // Closure
    Vacio,
    ViajeCompletado,
    Cancelado,
}

impl UnitState {
    /// The unit track in order, cancellation excluded
    pub const SEQUENCE: [UnitState; 15] = [
        UnitState::Pendiente,
        UnitState::TransporteAsignado,
        UnitState::CamionAsignado,
        UnitState::ConfirmadoChofer,
        UnitState::EnTransitoOrigen,
        UnitState::ArriboOrigen,
        UnitState::IngresadoOrigen,
        UnitState::EnPlayaOrigen,
        UnitState::EgresoOrigen,
        UnitState::EnTransitoDestino,
        UnitState::ArriboDestino,
        UnitState::IngresadoDestino,
        UnitState::EgresoDestino,
        UnitState::Vacio,
        UnitState::ViajeCompletado,
    ];

    pub fn phase(&self) -> Phase {
        use UnitState::*;
        match self {
            Pendiente => Phase::Creation,
            TransporteAsignado | CamionAsignado | ConfirmadoChofer => Phase::Assignment,
            EnTransitoOrigen | ArriboOrigen => Phase::TransitToOrigin,
            IngresadoOrigen | EnPlayaOrigen | EgresoOrigen => Phase::AtOrigin,
            EnTransitoDestino | ArriboDestino => Phase::TransitToDestination,
            IngresadoDestino | EgresoDestino => Phase::AtDestination,
            Vacio | ViajeCompletado => Phase::Closure,
            Cancelado => Phase::Cancelled,
        }
    }

    /// Position within the unit track; `None` for `cancelado`
    pub fn ordinal(&self) -> Option<usize> {
        Self::SEQUENCE.iter().position(|s| s == self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::ViajeCompletado | UnitState::Cancelado)
    }

    pub fn as_str(&self) -> &'static str {
        use UnitState::*;
        match self {
            Pendiente => "pendiente",
            TransporteAsignado => "transporte_asignado",
            CamionAsignado => "camion_asignado",
            ConfirmadoChofer => "confirmado_chofer",
            EnTransitoOrigen => "en_transito_origen",
            ArriboOrigen => "arribo_origen",
            IngresadoOrigen => "ingresado_origen",
            EnPlayaOrigen => "en_playa_origen",
            EgresoOrigen => "egreso_origen",
            EnTransitoDestino => "en_transito_destino",
            ArriboDestino => "arribo_destino",
            IngresadoDestino => "ingresado_destino",
            EgresoDestino => "egreso_destino",
            Vacio => "vacio",
            ViajeCompletado => "viaje_completado",
            Cancelado => "cancelado",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UnitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::SEQUENCE
            .iter()
            .chain(std::iter::once(&UnitState::Cancelado))
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown unit state: {}", s))
    }
}

/// Cargo (loading/unloading) states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CargoState {
    /// No cargo handling has started
    Pendiente,
    // Loading (origin)
    LlamadoCarga,
    Cargando,
    Cargado,
    // Unloading (destination)
    LlamadoDescarga,
    Descargando,
    Descargado,
    Cancelado,
}

impl CargoState {
    /// The cargo track in order, cancellation excluded
    pub const SEQUENCE: [CargoState; 7] = [
        CargoState::Pendiente,
        CargoState::LlamadoCarga,
        CargoState::Cargando,
        CargoState::Cargado,
        CargoState::LlamadoDescarga,
        CargoState::Descargando,
        CargoState::Descargado,
    ];

    /// The unit phase this cargo state requires before it can be reached
    pub fn governing_phase(&self) -> Phase {
        use CargoState::*;
        match self {
            Pendiente => Phase::Creation,
            LlamadoCarga | Cargando | Cargado => Phase::AtOrigin,
            LlamadoDescarga | Descargando | Descargado => Phase::AtDestination,
            Cancelado => Phase::Cancelled,
        }
    }

    /// Position within the cargo track; `None` for `cancelado`
    pub fn ordinal(&self) -> Option<usize> {
        Self::SEQUENCE.iter().position(|s| s == self)
    }

    pub fn is_loading(&self) -> bool {
        self.governing_phase() == Phase::AtOrigin
    }

    pub fn is_unloading(&self) -> bool {
        self.governing_phase() == Phase::AtDestination
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CargoState::Descargado | CargoState::Cancelado)
    }

    pub fn as_str(&self) -> &'static str {
        use CargoState::*;
        match self {
            Pendiente => "pendiente",
            LlamadoCarga => "llamado_carga",
            Cargando => "cargando",
            Cargado => "cargado",
            LlamadoDescarga => "llamado_descarga",
            Descargando => "descargando",
            Descargado => "descargado",
            Cancelado => "cancelado",
        }
    }
}

impl fmt::Display for CargoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CargoState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::SEQUENCE
            .iter()
            .chain(std::iter::once(&CargoState::Cancelado))
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown cargo state: {}", s))
    }
}

/// A state on either track
///
/// Serializes as the bare state name. `pendiente` and `cancelado` exist on both
/// tracks and deserialize to the unit variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackState {
    Unit(UnitState),
    Cargo(CargoState),
}

impl TrackState {
    /// Parse a state name on a specific track
    pub fn parse(track: Track, s: &str) -> Result<Self, String> {
        match track {
            Track::Unit => s.parse().map(TrackState::Unit),
            Track::Cargo => s.parse().map(TrackState::Cargo),
        }
    }

    /// The cancellation value on the given track
    pub fn cancelled(track: Track) -> Self {
        match track {
            Track::Unit => TrackState::Unit(UnitState::Cancelado),
            Track::Cargo => TrackState::Cargo(CargoState::Cancelado),
        }
    }

    pub fn track(&self) -> Track {
        match self {
            TrackState::Unit(_) => Track::Unit,
            TrackState::Cargo(_) => Track::Cargo,
        }
    }

    /// Unit states report their own phase, cargo states their governing phase
    pub fn phase(&self) -> Phase {
        match self {
            TrackState::Unit(s) => s.phase(),
            TrackState::Cargo(s) => s.governing_phase(),
        }
    }

    pub fn ordinal(&self) -> Option<usize> {
        match self {
            TrackState::Unit(s) => s.ordinal(),
            TrackState::Cargo(s) => s.ordinal(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            TrackState::Unit(s) => s.is_terminal(),
            TrackState::Cargo(s) => s.is_terminal(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TrackState::Unit(UnitState::Cancelado) | TrackState::Cargo(CargoState::Cancelado)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackState::Unit(s) => s.as_str(),
            TrackState::Cargo(s) => s.as_str(),
        }
    }
}

impl From<UnitState> for TrackState {
    fn from(state: UnitState) -> Self {
        TrackState::Unit(state)
    }
}

impl From<CargoState> for TrackState {
    fn from(state: CargoState) -> Self {
        TrackState::Cargo(state)
    }
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TrackState {
    type Err = String;

    /// Unit names win for the names both tracks share
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackState::parse(Track::Unit, s)
            .or_else(|_| TrackState::parse(Track::Cargo, s))
            .map_err(|_| format!("Unknown trip state: {}", s))
    }
}

/// The pair of states a trip is in at any moment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualState {
    pub unit: UnitState,
    pub cargo: CargoState,
}

impl DualState {
    pub fn new(unit: UnitState, cargo: CargoState) -> Self {
        Self { unit, cargo }
    }

    pub fn on(&self, track: Track) -> TrackState {
        match track {
            Track::Unit => TrackState::Unit(self.unit),
            Track::Cargo => TrackState::Cargo(self.cargo),
        }
    }

    pub fn unit_phase(&self) -> Phase {
        self.unit.phase()
    }

    pub fn is_cancelled(&self) -> bool {
        self.unit == UnitState::Cancelado || self.cargo == CargoState::Cancelado
    }

    pub fn is_completed(&self) -> bool {
        self.unit == UnitState::ViajeCompletado
    }

    /// Cancelled or completed: neither track may move again
    pub fn is_closed(&self) -> bool {
        self.is_cancelled() || self.is_completed()
    }

    /// Both tracks sit on their last requestable success state
    pub fn ready_to_close(&self) -> bool {
        self.unit == UnitState::Vacio && self.cargo == CargoState::Descargado
    }

    /// Ordering key used to pick the most advanced of several trips
    pub fn progress_key(&self) -> (usize, usize) {
        (
            self.unit.ordinal().unwrap_or(0),
            self.cargo.ordinal().unwrap_or(0),
        )
    }
}
