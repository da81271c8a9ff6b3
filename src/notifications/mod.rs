//! Notification trigger - tells the other party that a trip moved

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::NotificationsConfig;
use crate::domain::{CargoState, Role, TrackState, UnitState};
use crate::events::{Event, EventBus};

mod sinks;

pub use sinks::*;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Delivery rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Payload handed to the delivery collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub trip_id: Uuid,
    pub dispatch_id: Uuid,
    pub new_state: TrackState,
    pub recipient_role: Role,
    pub created_at: DateTime<Utc>,
}

/// Who should hear about a trip reaching `state`; `None` means nobody
pub fn recipient_for(state: TrackState) -> Option<Role> {
    use CargoState as C;
    use UnitState as U;

    match state {
        TrackState::Unit(U::TransporteAsignado) => Some(Role::CoordinadorTransporte),
        TrackState::Unit(U::CamionAsignado) => Some(Role::Chofer),
        TrackState::Unit(U::ConfirmadoChofer) => Some(Role::Coordinador),
        TrackState::Unit(U::ArriboOrigen | U::ArriboDestino) => Some(Role::ControlAcceso),
        TrackState::Unit(U::IngresadoOrigen | U::IngresadoDestino) => Some(Role::Supervisor),
        TrackState::Unit(U::EgresoOrigen | U::EgresoDestino) => Some(Role::Coordinador),
        TrackState::Unit(U::ViajeCompletado) => Some(Role::Coordinador),
        TrackState::Unit(U::Cancelado) | TrackState::Cargo(C::Cancelado) => {
            Some(Role::CoordinadorTransporte)
        }
        TrackState::Cargo(C::LlamadoCarga | C::LlamadoDescarga) => Some(Role::Chofer),
        TrackState::Cargo(C::Cargado | C::Descargado) => Some(Role::Coordinador),
        _ => None,
    }
}

/// Maps new states to recipients and hands them to a sink without waiting
#[derive(Clone)]
pub struct NotificationTrigger {
    sink: Arc<dyn NotificationSink>,
    event_bus: EventBus,
}

impl NotificationTrigger {
    pub fn new(sink: Arc<dyn NotificationSink>, event_bus: EventBus) -> Self {
        Self { sink, event_bus }
    }

    /// A trigger that only talks to live clients on the event bus
    pub fn event_bus_only(event_bus: EventBus) -> Self {
        let sink = Arc::new(EventBusSink::new(event_bus.clone()));
        Self::new(sink, event_bus)
    }

    /// Assemble the configured sinks: the event bus, a webhook, both or neither
    pub fn from_config(
        config: &NotificationsConfig,
        event_bus: EventBus,
    ) -> Result<Self, NotificationError> {
        let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
        if config.event_bus {
            sinks.push(Arc::new(EventBusSink::new(event_bus.clone())));
        }
        if let Some(url) = &config.webhook_url {
            let timeout = Duration::from_secs(config.webhook_timeout_seconds);
            sinks.push(Arc::new(WebhookSink::new(url.clone(), timeout)?));
        }

        let sink: Arc<dyn NotificationSink> = match sinks.len() {
            0 => Arc::new(NoopSink),
            1 => sinks.remove(0),
            _ => Arc::new(FanoutSink::new(sinks)),
        };
        tracing::info!("Notifications delivered via {}", sink.name());

        Ok(Self::new(sink, event_bus))
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Build the notification for a state, if anybody should receive one
    pub fn prepare(&self, trip_id: Uuid, dispatch_id: Uuid, new_state: TrackState) -> Option<Notification> {
        recipient_for(new_state).map(|recipient_role| Notification {
            trip_id,
            dispatch_id,
            new_state,
            recipient_role,
            created_at: Utc::now(),
        })
    }

    /// Fire and forget. Failures are logged and published, never returned.
    pub fn notify(
        &self,
        trip_id: Uuid,
        dispatch_id: Uuid,
        new_state: TrackState,
    ) -> Option<JoinHandle<()>> {
        let notification = self.prepare(trip_id, dispatch_id, new_state)?;
        let sink = Arc::clone(&self.sink);
        let event_bus = self.event_bus.clone();

        Some(tokio::spawn(async move {
            if let Err(e) = sink.deliver(&notification).await {
                tracing::warn!(
                    "Notification for trip {} ({} -> {}) via {} failed: {}",
                    notification.trip_id,
                    notification.new_state,
                    notification.recipient_role,
                    sink.name(),
                    e
                );
                event_bus.publish(Event::NotificationFailed {
                    dispatch_id: notification.dispatch_id,
                    trip_id: notification.trip_id,
                    state: notification.new_state,
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_table() {
        assert_eq!(
            recipient_for(CargoState::LlamadoCarga.into()),
            Some(Role::Chofer)
        );
        assert_eq!(
            recipient_for(CargoState::Cargado.into()),
            Some(Role::Coordinador)
        );
        assert_eq!(
            recipient_for(UnitState::IngresadoOrigen.into()),
            Some(Role::Supervisor)
        );
        assert_eq!(recipient_for(UnitState::EnTransitoOrigen.into()), None);
        assert_eq!(recipient_for(CargoState::Cargando.into()), None);
    }

    #[tokio::test]
    async fn test_notify_skips_unmapped_states() {
        let trigger = NotificationTrigger::event_bus_only(EventBus::new());
        assert!(trigger
            .notify(Uuid::new_v4(), Uuid::new_v4(), UnitState::EnPlayaOrigen.into())
            .is_none());
    }

    #[tokio::test]
    async fn test_notify_delivers_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let trigger = NotificationTrigger::new(sink.clone(), EventBus::new());
        let trip_id = Uuid::new_v4();

        let handle = trigger
            .notify(trip_id, Uuid::new_v4(), CargoState::LlamadoCarga.into())
            .unwrap();
        handle.await.unwrap();

        let delivered = sink.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].trip_id, trip_id);
        assert_eq!(delivered[0].recipient_role, Role::Chofer);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_published() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        let trigger = NotificationTrigger::new(Arc::new(FailingSink), bus);

        let handle = trigger
            .notify(Uuid::new_v4(), Uuid::new_v4(), UnitState::ArriboOrigen.into())
            .unwrap();
        handle.await.unwrap();

        match receiver.recv().await.unwrap() {
            Event::NotificationFailed { message, .. } => {
                assert!(message.contains("offline"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_from_config_picks_sinks() {
        let bus = EventBus::new();

        let mut config = NotificationsConfig::default();
        let trigger = NotificationTrigger::from_config(&config, bus.clone()).unwrap();
        assert_eq!(trigger.sink_name(), "event_bus");

        config.webhook_url = Some("http://localhost:9/notify".to_string());
        let trigger = NotificationTrigger::from_config(&config, bus.clone()).unwrap();
        assert_eq!(trigger.sink_name(), "fanout");

        config.event_bus = false;
        config.webhook_url = None;
        let trigger = NotificationTrigger::from_config(&config, bus).unwrap();
        assert_eq!(trigger.sink_name(), "noop");
    }
}
