//! Contracts for the services this one depends on but does not own.

pub mod http;
pub mod mapbox;
pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::courier::{Coordinate, CourierId};
use crate::models::order::{MenuItemId, RestaurantId};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantInfo {
    pub address: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub price: f64,
    pub available: bool,
}

#[async_trait]
pub trait RestaurantDirectory: Send + Sync {
    async fn get_info(&self, restaurant_id: RestaurantId) -> Result<RestaurantInfo, AppError>;

    async fn get_menu_item(
        &self,
        restaurant_id: RestaurantId,
        item_id: MenuItemId,
    ) -> Result<MenuItem, AppError>;
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(&self, address: &str) -> Result<Coordinate, AppError>;
}

#[async_trait]
pub trait RoutingProvider: Send + Sync {
    /// Driving distance in kilometres.
    async fn distance_km(&self, from: &Coordinate, to: &Coordinate) -> Result<f64, AppError>;
}

#[async_trait]
pub trait CourierStatusNotifier: Send + Sync {
    async fn set_busy(&self, courier_id: CourierId) -> Result<(), AppError>;
}

/// Runs a collaborator call under `limit`. An expired call is a dependency
/// failure like any other.
pub async fn bounded<T, F>(what: &str, limit: Duration, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Dependency(format!(
            "{what} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
