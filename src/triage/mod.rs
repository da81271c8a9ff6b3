//! Triage - read-only bucketing of dispatches into dashboard tabs

use chrono::{Duration, FixedOffset, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::TriageConfig;
use crate::domain::{AssignmentOrigin, Dispatch, Trip};

/// Default scheduling window on either side of the scheduled time
pub const DEFAULT_WINDOW_MINUTES: i64 = 120;

/// Dashboard tab a dispatch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Pending,
    Assigned,
    InProgress,
    Delayed,
    Expired,
    Completed,
}

impl Bucket {
    pub const ALL: [Bucket; 6] = [
        Bucket::Pending,
        Bucket::Assigned,
        Bucket::InProgress,
        Bucket::Delayed,
        Bucket::Expired,
        Bucket::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Pending => "pending",
            Bucket::Assigned => "assigned",
            Bucket::InProgress => "in_progress",
            Bucket::Delayed => "delayed",
            Bucket::Expired => "expired",
            Bucket::Completed => "completed",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bucket::ALL
            .iter()
            .find(|b| b.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown bucket: {}", s))
    }
}

/// Bucket a dispatch given its current trip and the plant-local time.
///
/// Pure: identical inputs always give the identical bucket.
pub fn categorize(
    dispatch: &Dispatch,
    trip: Option<&Trip>,
    now: NaiveDateTime,
    window: Duration,
) -> Bucket {
    if let Some(state) = trip.map(|t| t.state()) {
        if state.is_closed() {
            return Bucket::Completed;
        }
    }

    let drift = now - dispatch.scheduled_at;
    let within_window = drift <= window && -drift <= window;
    let on_time = |yes: Bucket, no: Bucket| if within_window { yes } else { no };

    // Moving units count as resourced even when their refs are empty.
    // Network-assigned refs are not trusted before the unit moves.
    let trusts_refs = dispatch.assignment_origin != AssignmentOrigin::RedNodexia;
    let resources_known = trip
        .map(|t| {
            t.unit_phase().is_moving()
                || (trusts_refs && t.driver_id.is_some() && t.truck_id.is_some())
        })
        .unwrap_or(false);
    let phase = trip.and_then(|t| t.unit_phase().number());

    match (resources_known, phase) {
        // Inside a plant, or emptied and awaiting closure
        (true, Some(3 | 5 | 6)) => Bucket::InProgress,
        (true, Some(2 | 4)) => on_time(Bucket::InProgress, Bucket::Delayed),
        (true, Some(1)) => on_time(Bucket::Assigned, Bucket::Delayed),
        _ => on_time(Bucket::Pending, Bucket::Expired),
    }
}

/// The trip that decides a dispatch's bucket: the active one, else the latest
pub fn current_trip(trips: &[Trip]) -> Option<&Trip> {
    let live = || trips.iter().filter(|t| !t.is_deleted());
    live()
        .filter(|t| t.is_active())
        .max_by_key(|t| t.trip_number)
        .or_else(|| live().max_by_key(|t| t.trip_number))
}

/// Count of dispatches per bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageSummary {
    pub pending: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub delayed: usize,
    pub expired: usize,
    pub completed: usize,
    pub total: usize,
}

impl TriageSummary {
    pub fn add(&mut self, bucket: Bucket) {
        let slot = match bucket {
            Bucket::Pending => &mut self.pending,
            Bucket::Assigned => &mut self.assigned,
            Bucket::InProgress => &mut self.in_progress,
            Bucket::Delayed => &mut self.delayed,
            Bucket::Expired => &mut self.expired,
            Bucket::Completed => &mut self.completed,
        };
        *slot += 1;
        self.total += 1;
    }

    pub fn count(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::Pending => self.pending,
            Bucket::Assigned => self.assigned,
            Bucket::InProgress => self.in_progress,
            Bucket::Delayed => self.delayed,
            Bucket::Expired => self.expired,
            Bucket::Completed => self.completed,
        }
    }
}

impl FromIterator<Bucket> for TriageSummary {
    fn from_iter<I: IntoIterator<Item = Bucket>>(iter: I) -> Self {
        let mut summary = TriageSummary::default();
        for bucket in iter {
            summary.add(bucket);
        }
        summary
    }
}

/// Triage with its window and the plant's clock
#[derive(Debug, Clone, Copy)]
pub struct Triage {
    window: Duration,
    utc_offset: FixedOffset,
}

impl Default for Triage {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_WINDOW_MINUTES), Utc.fix())
    }
}

impl Triage {
    pub fn new(window: Duration, utc_offset: FixedOffset) -> Self {
        Self { window, utc_offset }
    }

    pub fn from_config(config: &TriageConfig) -> Self {
        let utc_offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| {
            tracing::warn!(
                "Invalid triage utc offset {} minutes, using UTC",
                config.utc_offset_minutes
            );
            Utc.fix()
        });
        Self::new(Duration::minutes(config.window_minutes), utc_offset)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Current plant-local wall-clock time
    pub fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.utc_offset).naive_local()
    }

    pub fn categorize(&self, dispatch: &Dispatch, trip: Option<&Trip>, now: NaiveDateTime) -> Bucket {
        categorize(dispatch, trip, now, self.window)
    }

    /// Bucket a dispatch from all of its trips
    pub fn bucket(&self, dispatch: &Dispatch, trips: &[Trip], now: NaiveDateTime) -> Bucket {
        self.categorize(dispatch, current_trip(trips), now)
    }
}
