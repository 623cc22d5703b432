#![deny(unsafe_code)]

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use motorpool_core::messages;
use motorpool_core::{
    AssignmentVerdict, EngineConfig, MotorpoolEngine, MotorpoolError, Person, PersonDraft,
    PersonId, PersonView, StorageConfig, Vehicle, VehicleDraft, VehicleId, VehicleView,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    /// Insert the demo fleet on startup.
    pub seed_demo: bool,
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<MotorpoolEngine>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ServiceConfig {
            storage,
            engine,
            seed_demo,
        } = config;
        let engine = MotorpoolEngine::bootstrap(storage, engine).await?;
        if seed_demo {
            engine.seed_demo().await?;
        }

        Ok(Self {
            engine: Arc::new(engine),
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/people", get(list_people).post(create_person))
        .route(
            "/v1/people/:id",
            get(show_person).put(update_person).delete(delete_person),
        )
        .route(
            "/v1/people/:id/assign-vehicle/:vehicle_id",
            post(assign_vehicle),
        )
        .route(
            "/v1/people/:id/unassign-vehicle/:vehicle_id",
            post(unassign_vehicle),
        )
        .route("/v1/vehicles", get(list_vehicles).post(create_vehicle))
        .route(
            "/v1/vehicles/:id",
            get(show_vehicle).put(update_vehicle).delete(delete_vehicle),
        )
        .route(
            "/v1/vehicles/:id/assign-driver/:person_id",
            post(assign_driver),
        )
        .route(
            "/v1/vehicles/:id/unassign-driver/:person_id",
            post(unassign_driver),
        )
        .fallback(unknown_route)
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core engine error: {0}")]
    Core(#[from] MotorpoolError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// A guard outcome other than allowed.
    #[error("{0}")]
    Rejected(String),
    #[error("{message}")]
    Invalid {
        message: String,
        errors: Vec<String>,
    },
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Core(#[from] MotorpoolError),
}

impl ApiError {
    fn not_found() -> Self {
        Self::NotFound("Not found.".to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Invalid {
            message: "The given data was invalid.".to_string(),
            errors: vec![rejection.body_text()],
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        Self::not_found()
    }
}

fn message_body(message: String) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": message }))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Rejected(message) => {
                (StatusCode::UNPROCESSABLE_ENTITY, message_body(message)).into_response()
            }
            ApiError::Invalid { message, errors } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({
                    "message": message,
                    "errors": { "body": errors },
                })),
            )
                .into_response(),
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, message_body(message)).into_response()
            }
            ApiError::Core(err) => {
                let status = match &err {
                    MotorpoolError::NotFound { .. } => StatusCode::NOT_FOUND,
                    MotorpoolError::AlreadyLinked { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    MotorpoolError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                    MotorpoolError::ConsistencyViolation(_) | MotorpoolError::Store(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    error!(status = status.as_u16(), error = %err, "request failed");
                }
                (status, message_body(err.to_string())).into_response()
            }
        }
    }
}

/// Turn a rejected verdict into a 422.
fn allowed(verdict: AssignmentVerdict) -> Result<AssignmentVerdict, ApiError> {
    if verdict.is_allowed() {
        Ok(verdict)
    } else {
        info!(
            trace_id = %verdict.trace_id,
            outcome = ?verdict.outcome,
            "assignment rejected"
        );
        Err(ApiError::Rejected(verdict.message))
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "motorpool-service",
        storage: state.engine.storage_label(),
    })
}

async fn unknown_route() -> ApiError {
    ApiError::not_found()
}

#[derive(Debug, Clone, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Clone, Serialize)]
struct PeopleResponse {
    people: Vec<Person>,
}

#[derive(Debug, Clone, Serialize)]
struct PersonResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    person: PersonView,
}

async fn list_people(State(state): State<ServiceState>) -> Result<Json<PeopleResponse>, ApiError> {
    Ok(Json(PeopleResponse {
        people: state.engine.list_people().await?,
    }))
}

async fn create_person(
    State(state): State<ServiceState>,
    payload: Result<Json<PersonDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<PersonResponse>), ApiError> {
    let Json(draft) = payload?;
    let person = state.engine.create_person(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(PersonResponse {
            message: Some(messages::person_saved(&person)),
            person: PersonView {
                person,
                vehicle: None,
            },
        }),
    ))
}

async fn show_person(
    State(state): State<ServiceState>,
    path: Result<Path<PersonId>, PathRejection>,
) -> Result<Json<PersonResponse>, ApiError> {
    let Path(id) = path?;
    Ok(Json(PersonResponse {
        message: None,
        person: state.engine.person_view(id).await?,
    }))
}

async fn update_person(
    State(state): State<ServiceState>,
    path: Result<Path<PersonId>, PathRejection>,
    payload: Result<Json<PersonDraft>, JsonRejection>,
) -> Result<Json<PersonResponse>, ApiError> {
    let Path(id) = path?;
    let Json(draft) = payload?;
    let person = state.engine.update_person(id, draft).await?;
    Ok(Json(PersonResponse {
        message: Some(messages::person_updated(&person.person)),
        person,
    }))
}

async fn delete_person(
    State(state): State<ServiceState>,
    path: Result<Path<PersonId>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Path(id) = path?;
    let person = state.engine.delete_person(id).await?;
    Ok(Json(MessageResponse {
        message: messages::person_deleted(&person),
    }))
}

async fn assign_vehicle(
    State(state): State<ServiceState>,
    path: Result<Path<(PersonId, VehicleId)>, PathRejection>,
) -> Result<Json<PersonResponse>, ApiError> {
    let Path((id, vehicle_id)) = path?;
    let AssignmentVerdict {
        message,
        person,
        vehicle,
        ..
    } = allowed(state.engine.assign_vehicle_to_person(id, vehicle_id).await?)?;
    // The committed pair, not a later read that a concurrent unassign could race.
    Ok(Json(PersonResponse {
        message: Some(message),
        person: PersonView {
            person,
            vehicle: Some(vehicle),
        },
    }))
}

async fn unassign_vehicle(
    State(state): State<ServiceState>,
    path: Result<Path<(PersonId, VehicleId)>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Path((id, vehicle_id)) = path?;
    let verdict = allowed(
        state
            .engine
            .unassign_vehicle_from_person(id, vehicle_id)
            .await?,
    )?;
    Ok(Json(MessageResponse {
        message: verdict.message,
    }))
}

#[derive(Debug, Clone, Serialize)]
struct VehiclesResponse {
    vehicles: Vec<Vehicle>,
}

#[derive(Debug, Clone, Serialize)]
struct VehicleResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    vehicle: VehicleView,
}

async fn list_vehicles(
    State(state): State<ServiceState>,
) -> Result<Json<VehiclesResponse>, ApiError> {
    Ok(Json(VehiclesResponse {
        vehicles: state.engine.list_vehicles().await?,
    }))
}

async fn create_vehicle(
    State(state): State<ServiceState>,
    payload: Result<Json<VehicleDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<VehicleResponse>), ApiError> {
    let Json(draft) = payload?;
    let vehicle = state.engine.create_vehicle(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(VehicleResponse {
            message: Some(messages::vehicle_saved(&vehicle)),
            vehicle: VehicleView {
                vehicle,
                driver: None,
            },
        }),
    ))
}

async fn show_vehicle(
    State(state): State<ServiceState>,
    path: Result<Path<VehicleId>, PathRejection>,
) -> Result<Json<VehicleResponse>, ApiError> {
    let Path(id) = path?;
    Ok(Json(VehicleResponse {
        message: None,
        vehicle: state.engine.vehicle_view(id).await?,
    }))
}

async fn update_vehicle(
    State(state): State<ServiceState>,
    path: Result<Path<VehicleId>, PathRejection>,
    payload: Result<Json<VehicleDraft>, JsonRejection>,
) -> Result<Json<VehicleResponse>, ApiError> {
    let Path(id) = path?;
    let Json(draft) = payload?;
    let vehicle = state.engine.update_vehicle(id, draft).await?;
    Ok(Json(VehicleResponse {
        message: Some(messages::vehicle_updated(&vehicle.vehicle)),
        vehicle,
    }))
}

async fn delete_vehicle(
    State(state): State<ServiceState>,
    path: Result<Path<VehicleId>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Path(id) = path?;
    let vehicle = state.engine.delete_vehicle(id).await?;
    Ok(Json(MessageResponse {
        message: messages::vehicle_deleted(&vehicle),
    }))
}

async fn assign_driver(
    State(state): State<ServiceState>,
    path: Result<Path<(VehicleId, PersonId)>, PathRejection>,
) -> Result<Json<VehicleResponse>, ApiError> {
    let Path((id, person_id)) = path?;
    let AssignmentVerdict {
        message,
        person,
        vehicle,
        ..
    } = allowed(state.engine.assign_driver_to_vehicle(id, person_id).await?)?;
    Ok(Json(VehicleResponse {
        message: Some(message),
        vehicle: VehicleView {
            vehicle,
            driver: Some(person),
        },
    }))
}

async fn unassign_driver(
    State(state): State<ServiceState>,
    path: Result<Path<(VehicleId, PersonId)>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Path((id, person_id)) = path?;
    let verdict = allowed(
        state
            .engine
            .unassign_driver_from_vehicle(id, person_id)
            .await?,
    )?;
    Ok(Json(MessageResponse {
        message: verdict.message,
    }))
}
