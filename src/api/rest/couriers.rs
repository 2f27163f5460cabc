use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::courier::{Coordinate, CourierId, CourierLocation, CourierStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", get(list_couriers).post(register_courier))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/status", patch(update_courier_status))
        .route(
            "/couriers/:id/location",
            get(get_courier_location).patch(update_courier_location),
        )
}

#[derive(Deserialize)]
pub struct RegisterCourierRequest {
    pub id: CourierId,
}

#[derive(Deserialize)]
pub struct ListCouriersQuery {
    pub status: Option<CourierStatus>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CourierStatus,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterCourierRequest>,
) -> Result<Json<CourierLocation>, AppError> {
    Ok(Json(state.couriers.register(payload.id).await?))
}

async fn list_couriers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCouriersQuery>,
) -> Json<Vec<CourierLocation>> {
    Json(state.couriers.list(query.status).await)
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
) -> Result<Json<CourierLocation>, AppError> {
    Ok(Json(state.couriers.get(id).await?))
}

async fn update_courier_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<CourierLocation>, AppError> {
    Ok(Json(state.couriers.set_status(id, payload.status).await?))
}

async fn update_courier_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
    Json(payload): Json<Coordinate>,
) -> Result<Json<CourierLocation>, AppError> {
    Ok(Json(state.couriers.set_location(id, payload).await?))
}

async fn get_courier_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
) -> Result<Json<Coordinate>, AppError> {
    Ok(Json(state.couriers.current_location(id).await?))
}
