//! Driving a dispatch through the assembled HTTP router

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use tower::ServiceExt;
use uuid::Uuid;

use nodexia::api::{build_router, AppState, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use nodexia::config::Config;
use nodexia::db::init_database;
use nodexia::events::EventBus;
use nodexia::notifications::NotificationTrigger;

async fn app() -> Router {
    let pool = init_database("sqlite::memory:").await.unwrap();
    let event_bus = EventBus::new();
    let notifier = NotificationTrigger::event_bus_only(event_bus.clone());
    let state = AppState::new(pool, event_bus, notifier, &Config::default());
    build_router(state, true)
}

async fn json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: String) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: String, actor: Option<(&str, &str)>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some((id, role)) = actor {
        builder = builder
            .header(ACTOR_ID_HEADER, id)
            .header(ACTOR_ROLE_HEADER, role);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, json(response).await)
}

async fn create_dispatch(app: &Router, code: &str, origin: &str) -> Uuid {
    let (status, body) = send(
        app,
        post(
            "/api/dispatches".to_string(),
            None,
            serde_json::json!({
                "code": code,
                "originLocationId": Uuid::new_v4(),
                "destinationLocationId": Uuid::new_v4(),
                "scheduledAt": "2026-03-10T09:00:00",
                "priority": "alta",
                "assignmentOrigin": origin
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().parse().unwrap()
}

async fn transition(app: &Router, trip_id: Uuid, role: &str, state: &str) -> serde_json::Value {
    let (status, body) = send(
        app,
        post(
            format!("/api/trips/{}/transition", trip_id),
            Some(("user-1", role)),
            serde_json::json!({ "state": state }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{} -> {}: {}", role, state, body);
    body
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let response = app.oneshot(get("/health".to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_dispatch_lifecycle_over_http() {
    let app = app().await;
    let dispatch_id = create_dispatch(&app, "DSP-HTTP-1", "directo").await;

    let (status, body) = send(
        &app,
        post(
            format!("/api/dispatches/{}/assign", dispatch_id),
            Some(("coord-1", "coordinador")),
            serde_json::json!({ "transportCompanyId": Uuid::new_v4() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["unitState"], "transporte_asignado");
    let trip_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();

    let (status, body) = send(
        &app,
        post(
            format!("/api/trips/{}/resources", trip_id),
            Some(("carrier-1", "coordinador_transporte")),
            serde_json::json!({ "driverId": Uuid::new_v4(), "truckId": Uuid::new_v4() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["advancedTo"], "camion_asignado");

    // Loading before the truck is in the plant
    let (status, body) = send(
        &app,
        post(
            format!("/api/trips/{}/transition", trip_id),
            Some(("yard-1", "supervisor")),
            serde_json::json!({ "state": "llamado_carga" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
    assert_eq!(body["error"]["details"]["previousState"], "pendiente");
    assert!(body["error"]["details"]["suggestedActions"]["unit"].is_array());

    transition(&app, trip_id, "chofer", "confirmado_chofer").await;
    transition(&app, trip_id, "chofer", "en_transito_origen").await;
    transition(&app, trip_id, "control_acceso", "ingresado_origen").await;
    let body = transition(&app, trip_id, "supervisor", "llamado_carga").await;
    assert_eq!(body["data"]["track"], "cargo");
    assert_eq!(body["data"]["dispatchStatus"], "llamado_carga");

    let (status, body) = send(&app, get(format!("/api/dispatches/{}", dispatch_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "llamado_carga");
    assert_eq!(body["data"]["bucket"], "in_progress");
    assert_eq!(body["data"]["trips"][0]["unitState"], "ingresado_origen");
    assert_eq!(body["data"]["trips"][0]["cargoState"], "llamado_carga");

    let (status, body) = send(
        &app,
        get(format!("/api/trips/{}/next-states?role=supervisor", trip_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let unit = body["data"]["nextValidStates"]["unit"].as_array().unwrap();
    assert!(unit.contains(&serde_json::json!("en_playa_origen")));
    assert!(unit.contains(&serde_json::json!("cancelado")));

    let (status, body) = send(&app, get(format!("/api/trips/{}/log", trip_id))).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 7);
    assert_eq!(entries[0]["kind"], "assignment");

    let (status, body) = send(&app, get("/api/dispatches/triage".to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["inProgress"], 1);
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn test_cancel_then_reassign_over_http() {
    let app = app().await;
    let dispatch_id = create_dispatch(&app, "DSP-HTTP-2", "red_nodexia").await;
    let assign = || {
        post(
            format!("/api/dispatches/{}/assign", dispatch_id),
            Some(("coord-1", "coordinador")),
            serde_json::json!({}),
        )
    };

    let (_, body) = send(&app, assign()).await;
    let trip_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();

    let (status, body) = send(&app, assign()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DISPATCH_HAS_ACTIVE_TRIP");

    let body = transition(&app, trip_id, "coordinador", "cancelado").await;
    assert_eq!(body["data"]["unitState"], "cancelado");
    assert_eq!(body["data"]["cargoState"], "cancelado");
    assert_eq!(body["data"]["dispatchStatus"], "cancelado");

    let (status, body) = send(&app, assign()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["tripNumber"], 2);

    let (_, body) = send(&app, get(format!("/api/dispatches/{}", dispatch_id))).await;
    assert_eq!(body["data"]["status"], "transporte_asignado");
    assert_eq!(body["data"]["trips"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_transition_requires_actor_headers() {
    let app = app().await;
    let (status, body) = send(
        &app,
        post(
            format!("/api/trips/{}/transition", Uuid::new_v4()),
            None,
            serde_json::json!({ "state": "camion_asignado" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"]["code"].is_string());
}
