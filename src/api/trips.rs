//! Trip API routes

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db;
use crate::domain::{
    CargoState, ResourceAssignment, Role, Track, TrackState, TripLogEntry, TripView, UnitState,
};
use crate::state_machine::NextStates;
use crate::sync::{ResourcesOutcome, TransitionCommand, TransitionOutcome};

use super::{ApiResponse, AppError, AppState, RequestActor};

/// Create trip routes
pub fn trip_routes() -> Router<AppState> {
    Router::new()
        .route("/:trip_id", get(get_trip))
        .route("/:trip_id/transition", post(transition_trip))
        .route("/:trip_id/resources", post(assign_resources))
        .route("/:trip_id/close", post(close_trip))
        .route("/:trip_id/next-states", get(next_states))
        .route("/:trip_id/log", get(trip_log))
}

/// Request to move one track of a trip
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    /// Target state name
    pub state: String,
    /// Needed only for names both tracks share (`cancelado`, `pendiente`)
    pub track: Option<Track>,
    pub observation: Option<String>,
    /// State the caller last saw on that track
    pub expected_state: Option<String>,
}

impl TransitionRequest {
    fn target(&self) -> Result<TrackState, AppError> {
        match self.track {
            Some(track) => TrackState::parse(track, &self.state),
            None => self.state.parse(),
        }
        .map_err(AppError::BadRequest)
    }

    fn expected(&self, track: Track) -> Result<Option<TrackState>, AppError> {
        self.expected_state
            .as_deref()
            .map(|s| TrackState::parse(track, s))
            .transpose()
            .map_err(AppError::BadRequest)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignResourcesRequest {
    #[serde(flatten)]
    pub resources: ResourceAssignment,
    pub observation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NextStatesQuery {
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripDetail {
    #[serde(flatten)]
    pub trip: TripView,
    pub next_valid_states: NextStates,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStatesResponse {
    pub trip_id: Uuid,
    pub unit_state: UnitState,
    pub cargo_state: CargoState,
    pub role: Option<Role>,
    pub next_valid_states: NextStates,
}

async fn get_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<ApiResponse<TripDetail>>, AppError> {
    let trip = db::get_trip(&state.pool, trip_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Trip {} not found", trip_id)))?;

    let next_valid_states = state.synchronizer.machine().next_states(trip.state(), None);

    Ok(Json(ApiResponse::new(TripDetail {
        trip: trip.into(),
        next_valid_states,
    })))
}

async fn transition_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<ApiResponse<TransitionOutcome>>, AppError> {
    let target = req.target()?;
    let mut command = TransitionCommand::new(trip_id, target, actor);
    command.observation = req.observation.clone();
    command.expected = req.expected(target.track())?;

    let outcome = state.synchronizer.apply_transition(command).await?;
    Ok(Json(ApiResponse::new(outcome)))
}

async fn assign_resources(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(req): Json<AssignResourcesRequest>,
) -> Result<Json<ApiResponse<ResourcesOutcome>>, AppError> {
    let outcome = state
        .synchronizer
        .assign_resources(trip_id, req.resources, actor, req.observation)
        .await?;
    Ok(Json(ApiResponse::new(outcome)))
}

async fn close_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> Result<Json<ApiResponse<TransitionOutcome>>, AppError> {
    let outcome = state.synchronizer.close_trip(trip_id, actor).await?;
    Ok(Json(ApiResponse::new(outcome)))
}

async fn next_states(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
    Query(query): Query<NextStatesQuery>,
    actor: Option<RequestActor>,
) -> Result<Json<ApiResponse<NextStatesResponse>>, AppError> {
    let role = match query.role.as_deref() {
        Some(role) => Some(role.parse::<Role>().map_err(AppError::BadRequest)?),
        None => actor.map(|RequestActor(actor)| actor.role),
    };

    let (trip, next_valid_states) = state.synchronizer.next_states(trip_id, role).await?;

    Ok(Json(ApiResponse::new(NextStatesResponse {
        trip_id: trip.id,
        unit_state: trip.unit_state,
        cargo_state: trip.cargo_state,
        role,
        next_valid_states,
    })))
}

async fn trip_log(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<TripLogEntry>>>, AppError> {
    if db::get_trip(&state.pool, trip_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Trip {} not found", trip_id)));
    }

    let entries = db::list_trip_log(&state.pool, trip_id).await?;
    Ok(Json(ApiResponse::new(entries)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{body_json, create_test_state};
    use crate::api::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
    use crate::domain::{Actor, AssignmentOrigin, CreateDispatchRequest, Priority};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::NaiveDate;
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        Router::new().nest("/trips", trip_routes()).with_state(state)
    }

    async fn create_trip(state: &AppState, origin: AssignmentOrigin) -> Uuid {
        let dispatch = db::create_dispatch(
            &state.pool,
            &CreateDispatchRequest {
                code: format!("DSP-{}", Uuid::new_v4()),
                origin_location_id: Uuid::new_v4(),
                destination_location_id: Uuid::new_v4(),
                scheduled_at: NaiveDate::from_ymd_opt(2026, 3, 10)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
                priority: Some(Priority::Alta),
                assignment_origin: Some(origin),
            },
        )
        .await
        .unwrap();

        state
            .synchronizer
            .assign_transport(dispatch.id, None, Actor::new("coord-1", Role::Coordinador), None)
            .await
            .unwrap()
            .id
    }

    fn post(uri: String, role: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(ACTOR_ID_HEADER, "user-1")
            .header(ACTOR_ROLE_HEADER, role)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_transition_and_log() {
        let state = create_test_state().await;
        let trip_id = create_trip(&state, AssignmentOrigin::Directo).await;
        let app = app(state);

        let response = app
            .clone()
            .oneshot(post(
                format!("/trips/{}/transition", trip_id),
                "coordinador_transporte",
                serde_json::json!({ "state": "camion_asignado", "observation": "truck AB123" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["success"], true);
        assert_eq!(json["data"]["previousState"], "transporte_asignado");
        assert_eq!(json["data"]["newState"], "camion_asignado");
        assert_eq!(json["data"]["dispatchStatus"], "camion_asignado");

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/trips/{}/log", trip_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        let entries = json["data"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1]["annotation"],
            "[unit: transporte_asignado -> camion_asignado] truck AB123"
        );
    }

    #[tokio::test]
    async fn test_invalid_transition_carries_suggestions() {
        let state = create_test_state().await;
        let trip_id = create_trip(&state, AssignmentOrigin::Directo).await;

        let response = app(state)
            .oneshot(post(
                format!("/trips/{}/transition", trip_id),
                "coordinador",
                serde_json::json!({ "state": "cargando" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "INVALID_TRANSITION");
        assert_eq!(json["error"]["details"]["previousState"], "pendiente");
        let unit = json["error"]["details"]["suggestedActions"]["unit"]
            .as_array()
            .unwrap();
        assert!(unit.iter().any(|s| s == "camion_asignado"));
    }

    #[tokio::test]
    async fn test_cancel_on_cargo_track() {
        let state = create_test_state().await;
        let trip_id = create_trip(&state, AssignmentOrigin::Directo).await;

        let response = app(state)
            .oneshot(post(
                format!("/trips/{}/transition", trip_id),
                "coordinador",
                serde_json::json!({ "state": "cancelado", "track": "carga" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["track"], "cargo");
        assert_eq!(json["data"]["unitState"], "cancelado");
        assert_eq!(json["data"]["dispatchStatus"], "cancelado");
    }

    #[tokio::test]
    async fn test_stale_expected_state_conflicts() {
        let state = create_test_state().await;
        let trip_id = create_trip(&state, AssignmentOrigin::Directo).await;

        let response = app(state)
            .oneshot(post(
                format!("/trips/{}/transition", trip_id),
                "coordinador",
                serde_json::json!({ "state": "confirmado_chofer", "expectedState": "camion_asignado" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(response).await["error"]["code"],
            "CONCURRENT_MODIFICATION"
        );
    }

    #[tokio::test]
    async fn test_unknown_state_is_bad_request() {
        let state = create_test_state().await;
        let trip_id = create_trip(&state, AssignmentOrigin::Directo).await;

        let response = app(state)
            .oneshot(post(
                format!("/trips/{}/transition", trip_id),
                "coordinador",
                serde_json::json!({ "state": "teleported" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_network_trip_hides_stale_resources() {
        let state = create_test_state().await;
        let trip_id = create_trip(&state, AssignmentOrigin::RedNodexia).await;
        let app = app(state);

        let truck = Uuid::new_v4();
        let response = app
            .clone()
            .oneshot(post(
                format!("/trips/{}/resources", trip_id),
                "coordinador_transporte",
                serde_json::json!({ "driverId": Uuid::new_v4(), "truckId": truck }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["advancedTo"], "camion_asignado");

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/trips/{}", trip_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["data"]["truckId"], truck.to_string());
        assert!(json["data"]["effectiveTruckId"].is_null());
        assert_eq!(json["data"]["resourcesStale"], true);
    }

    #[tokio::test]
    async fn test_next_states_by_role() {
        let state = create_test_state().await;
        let trip_id = create_trip(&state, AssignmentOrigin::Directo).await;
        let app = app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/trips/{}/next-states?role=chofer", trip_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["role"], "chofer");
        let unit: Vec<&str> = json["data"]["nextValidStates"]["unit"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s.as_str())
            .collect();
        assert_eq!(unit, vec!["camion_asignado", "cancelado"]);
    }

    #[tokio::test]
    async fn test_close_not_ready() {
        let state = create_test_state().await;
        let trip_id = create_trip(&state, AssignmentOrigin::Directo).await;

        let response = app(state)
            .oneshot(post(
                format!("/trips/{}/close", trip_id),
                "coordinador",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"]["code"], "TRIP_NOT_CLOSABLE");
    }

    #[tokio::test]
    async fn test_unknown_trip_not_found() {
        let state = create_test_state().await;
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/trips/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
