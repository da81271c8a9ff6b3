//! WebSocket server for real-time updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::events::{Event, EventBus};

use super::AppState;

/// WebSocket message from client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default, rename = "dispatchIds")]
        dispatch_ids: Vec<Uuid>,
        #[serde(default, rename = "tripIds")]
        trip_ids: Vec<Uuid>,
    },
    Unsubscribe {
        #[serde(default, rename = "dispatchIds")]
        dispatch_ids: Vec<Uuid>,
        #[serde(default, rename = "tripIds")]
        trip_ids: Vec<Uuid>,
    },
    Ping,
}

/// WebSocket message to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    Error { message: String },
    Event { event: Event },
}

/// Handle WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = Uuid::new_v4().to_string();
    tracing::debug!("WebSocket {} connected", connection_id);

    let (outbox, mut outbox_rx) = mpsc::channel::<ServerMessage>(64);

    // Forward bus events this connection asked for
    let mut events = state.event_bus.subscribe();
    let event_bus = state.event_bus.clone();
    let conn_id = connection_id.clone();
    let events_outbox = outbox.clone();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event_bus.wants(&conn_id, &event).await
                        && events_outbox.send(ServerMessage::Event { event }).await.is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("WebSocket {} lagged, {} events dropped", conn_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        handle_client_message(&state.event_bus, &connection_id, client_msg).await
                    }
                    Err(e) => Some(ServerMessage::Error {
                        message: format!("Invalid message: {}", e),
                    }),
                };
                if let Some(reply) = reply {
                    if outbox.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // Clean up
    state.event_bus.remove_connection(&connection_id).await;
    event_task.abort();
    send_task.abort();
    tracing::debug!("WebSocket {} disconnected", connection_id);
}

async fn handle_client_message(
    event_bus: &EventBus,
    connection_id: &str,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Subscribe {
            dispatch_ids,
            trip_ids,
        } => {
            for dispatch_id in dispatch_ids {
                event_bus.subscribe_to_dispatch(connection_id, dispatch_id).await;
            }
            for trip_id in trip_ids {
                event_bus.subscribe_to_trip(connection_id, trip_id).await;
            }
            None
        }
        ClientMessage::Unsubscribe {
            dispatch_ids,
            trip_ids,
        } => {
            for dispatch_id in dispatch_ids {
                event_bus
                    .unsubscribe_from_dispatch(connection_id, dispatch_id)
                    .await;
            }
            for trip_id in trip_ids {
                event_bus.unsubscribe_from_trip(connection_id, trip_id).await;
            }
            None
        }
        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}
