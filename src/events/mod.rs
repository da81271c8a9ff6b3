//! Event bus for pub/sub communication between components

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::domain::{Role, Track, TrackState, TripLogEntry};

/// Event types that can be published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Dispatch was created
    DispatchCreated {
        dispatch_id: Uuid,
        code: String,
        timestamp: DateTime<Utc>,
    },

    /// A new trip was opened for a dispatch
    TripAssigned {
        dispatch_id: Uuid,
        trip_id: Uuid,
        trip_number: i32,
        timestamp: DateTime<Utc>,
    },

    /// A trip moved on one of its tracks
    TripTransitioned {
        dispatch_id: Uuid,
        trip_id: Uuid,
        track: Track,
        from_state: TrackState,
        to_state: TrackState,
        closed: bool,
        entry: Box<TripLogEntry>,
        timestamp: DateTime<Utc>,
    },

    /// The summary status mirrored on a dispatch changed
    DispatchStatusChanged {
        dispatch_id: Uuid,
        from_status: TrackState,
        to_status: TrackState,
        timestamp: DateTime<Utc>,
    },

    /// Driver, truck or trailer refs were set on a trip
    ResourcesAssigned {
        dispatch_id: Uuid,
        trip_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A notification addressed to a role
    Notification {
        dispatch_id: Uuid,
        trip_id: Uuid,
        state: TrackState,
        recipient_role: Role,
        timestamp: DateTime<Utc>,
    },

    /// A notification could not be delivered
    NotificationFailed {
        dispatch_id: Uuid,
        trip_id: Uuid,
        state: TrackState,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the dispatch ID associated with this event
    pub fn dispatch_id(&self) -> Uuid {
        match self {
            Event::DispatchCreated { dispatch_id, .. } => *dispatch_id,
            Event::TripAssigned { dispatch_id, .. } => *dispatch_id,
            Event::TripTransitioned { dispatch_id, .. } => *dispatch_id,
            Event::DispatchStatusChanged { dispatch_id, .. } => *dispatch_id,
            Event::ResourcesAssigned { dispatch_id, .. } => *dispatch_id,
            Event::Notification { dispatch_id, .. } => *dispatch_id,
            Event::NotificationFailed { dispatch_id, .. } => *dispatch_id,
        }
    }

    /// Get the trip ID associated with this event (if applicable)
    pub fn trip_id(&self) -> Option<Uuid> {
        match self {
            Event::TripAssigned { trip_id, .. }
            | Event::TripTransitioned { trip_id, .. }
            | Event::ResourcesAssigned { trip_id, .. }
            | Event::Notification { trip_id, .. }
            | Event::NotificationFailed { trip_id, .. } => Some(*trip_id),
            Event::DispatchCreated { .. } | Event::DispatchStatusChanged { .. } => None,
        }
    }
}

/// Event bus for pub/sub communication
pub struct EventBus {
    /// Broadcast sender for all events
    sender: broadcast::Sender<Event>,

    /// Dispatch-specific subscriptions
    dispatch_subscriptions: Arc<RwLock<HashMap<Uuid, Vec<String>>>>,

    /// Trip-specific subscriptions
    trip_subscriptions: Arc<RwLock<HashMap<Uuid, Vec<String>>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            dispatch_subscriptions: Arc::new(RwLock::new(HashMap::new())),
            trip_subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish an event
    pub fn publish(&self, event: Event) {
        // Ignore errors if there are no receivers
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Subscribe a connection to events of one dispatch
    pub async fn subscribe_to_dispatch(&self, connection_id: &str, dispatch_id: Uuid) {
        let mut subs = self.dispatch_subscriptions.write().await;
        subs.entry(dispatch_id)
            .or_default()
            .push(connection_id.to_string());
    }

    /// Subscribe a connection to events of one trip
    pub async fn subscribe_to_trip(&self, connection_id: &str, trip_id: Uuid) {
        let mut subs = self.trip_subscriptions.write().await;
        subs.entry(trip_id)
            .or_default()
            .push(connection_id.to_string());
    }

    pub async fn unsubscribe_from_dispatch(&self, connection_id: &str, dispatch_id: Uuid) {
        let mut subs = self.dispatch_subscriptions.write().await;
        if let Some(connections) = subs.get_mut(&dispatch_id) {
            connections.retain(|c| c != connection_id);
        }
    }

    pub async fn unsubscribe_from_trip(&self, connection_id: &str, trip_id: Uuid) {
        let mut subs = self.trip_subscriptions.write().await;
        if let Some(connections) = subs.get_mut(&trip_id) {
            connections.retain(|c| c != connection_id);
        }
    }

    /// Remove all subscriptions for a connection
    pub async fn remove_connection(&self, connection_id: &str) {
        {
            let mut subs = self.dispatch_subscriptions.write().await;
            for connections in subs.values_mut() {
                connections.retain(|c| c != connection_id);
            }
            subs.retain(|_, connections| !connections.is_empty());
        }
        {
            let mut subs = self.trip_subscriptions.write().await;
            for connections in subs.values_mut() {
                connections.retain(|c| c != connection_id);
            }
            subs.retain(|_, connections| !connections.is_empty());
        }
    }

    pub async fn is_subscribed_to_dispatch(&self, connection_id: &str, dispatch_id: Uuid) -> bool {
        let subs = self.dispatch_subscriptions.read().await;
        subs.get(&dispatch_id)
            .map(|c| c.iter().any(|id| id == connection_id))
            .unwrap_or(false)
    }

    pub async fn is_subscribed_to_trip(&self, connection_id: &str, trip_id: Uuid) -> bool {
        let subs = self.trip_subscriptions.read().await;
        subs.get(&trip_id)
            .map(|c| c.iter().any(|id| id == connection_id))
            .unwrap_or(false)
    }

    /// Whether a connection wants to see `event`
    pub async fn wants(&self, connection_id: &str, event: &Event) -> bool {
        if self
            .is_subscribed_to_dispatch(connection_id, event.dispatch_id())
            .await
        {
            return true;
        }
        match event.trip_id() {
            Some(trip_id) => self.is_subscribed_to_trip(connection_id, trip_id).await,
            None => false,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            dispatch_subscriptions: Arc::clone(&self.dispatch_subscriptions),
            trip_subscriptions: Arc::clone(&self.trip_subscriptions),
        }
    }
}
