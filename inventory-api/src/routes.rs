//! 人员 CRUD 端点
//!
//! 挂载于 `/api/persons`，与存储操作一一对应：
//!
//! ```text
//! GET    /            -> list_persons
//! GET    /{id}        -> get_person
//! POST   /            -> create_person
//! PUT    /{id}        -> update_person
//! DELETE /{id}        -> delete_person
//! ```
//!
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use inventory_service::error::ServiceError;
use inventory_service::person::Person;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/persons", get(list_persons).post(create_person))
        .route(
            "/api/persons/{id}",
            get(get_person).put(update_person).delete(delete_person),
        )
        .with_state(state)
}

async fn list_persons(State(state): State<AppState>) -> ApiResult<Json<Vec<Person>>> {
    Ok(Json(state.service.find_all().await?))
}

async fn get_person(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Person>> {
    let person = state
        .service
        .find_by_id(id)
        .await?
        .ok_or(ApiError::Service(ServiceError::NotFound { id }))?;
    Ok(Json(person))
}

async fn create_person(
    State(state): State<AppState>,
    Json(person): Json<Person>,
) -> ApiResult<Json<Person>> {
    Ok(Json(state.service.save(person).await?))
}

async fn update_person(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(person): Json<Person>,
) -> ApiResult<Json<Person>> {
    Ok(Json(state.service.update(id, person).await?))
}

async fn delete_person(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.service.delete_by_id(id).await?;
    Ok(())
}
