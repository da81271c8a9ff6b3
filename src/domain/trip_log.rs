//! Append-only audit log attached to each trip

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actor::Actor;
use super::state::{Track, TrackState};

/// What kind of change a log entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Assignment,
    Transition,
    Resources,
    Closure,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Assignment => "assignment",
            LogKind::Transition => "transition",
            LogKind::Resources => "resources",
            LogKind::Closure => "closure",
        }
    }
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assignment" => Ok(LogKind::Assignment),
            "transition" => Ok(LogKind::Transition),
            "resources" => Ok(LogKind::Resources),
            "closure" => Ok(LogKind::Closure),
            _ => Err(format!("Unknown log kind: {}", s)),
        }
    }
}

/// One human-readable annotation on a trip
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripLogEntry {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub kind: LogKind,
    pub track: Track,
    pub from_state: TrackState,
    pub to_state: TrackState,
    pub actor: Actor,
    pub observation: Option<String>,
    /// Tag plus observation, as shown to operators
    pub annotation: String,
    pub created_at: DateTime<Utc>,
}

impl TripLogEntry {
    pub fn new(
        trip_id: Uuid,
        kind: LogKind,
        from_state: TrackState,
        to_state: TrackState,
        actor: &Actor,
        observation: Option<String>,
    ) -> Self {
        let observation = observation
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty());
        let tag = transition_tag(kind, from_state, to_state);
        let annotation = match &observation {
            Some(text) => format!("{} {}", tag, text),
            None => tag,
        };

        Self {
            id: Uuid::new_v4(),
            trip_id,
            kind,
            track: to_state.track(),
            from_state,
            to_state,
            actor: actor.clone(),
            observation,
            annotation,
            created_at: Utc::now(),
        }
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }
}

/// Prefix put in front of every annotation, e.g. `[unit: arribo_origen -> ingresado_origen]`
pub fn transition_tag(kind: LogKind, from: TrackState, to: TrackState) -> String {
    match kind {
        LogKind::Transition | LogKind::Closure => {
            format!("[{}: {} -> {}]", to.track(), from, to)
        }
        LogKind::Assignment => format!("[assignment: {}]", to),
        LogKind::Resources => format!("[resources @ {}]", to),
    }
}
