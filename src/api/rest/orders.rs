use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::courier::CourierId;
use crate::models::order::{Order, OrderId, OrderLine, RestaurantId};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/customers/:id/orders", get(customer_orders))
        .route("/restaurants/:id/orders", get(restaurant_orders))
        .route("/couriers/:id/orders", get(courier_orders))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: u64,
    pub restaurant_id: RestaurantId,
    pub items: Vec<OrderLine>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .create_order(payload.customer_id, payload.restaurant_id, payload.items)
        .await?;
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get_order(id).await?))
}

async fn customer_orders(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<u64>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders.orders_for_customer(customer_id).await?))
}

async fn restaurant_orders(
    State(state): State<Arc<AppState>>,
    Path(restaurant_id): Path<RestaurantId>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders.orders_for_restaurant(restaurant_id).await?))
}

async fn courier_orders(
    State(state): State<Arc<AppState>>,
    Path(courier_id): Path<CourierId>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.orders.orders_for_courier(courier_id).await?))
}
