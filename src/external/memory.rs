//! In-memory collaborators for local runs and tests. Each one can be told to
//! fail its next calls to exercise redelivery paths.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::external::{
    CourierStatusNotifier, Geocoder, MenuItem, RestaurantDirectory, RestaurantInfo,
    RoutingProvider,
};
use crate::geo::haversine_km;
use crate::models::courier::{Coordinate, CourierId};
use crate::models::order::{MenuItemId, RestaurantId};

#[derive(Debug, Default)]
pub struct Outage {
    remaining: AtomicUsize,
}

impl Outage {
    pub fn fail_next(&self, calls: usize) {
        self.remaining.store(calls, Ordering::SeqCst);
    }

    fn check(&self, what: &str) -> Result<(), AppError> {
        let failed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::Dependency(format!("{what} unavailable")));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRestaurantDirectory {
    restaurants: DashMap<RestaurantId, RestaurantInfo>,
    menu_items: DashMap<(RestaurantId, MenuItemId), MenuItem>,
    pub outage: Outage,
}

impl InMemoryRestaurantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_restaurant(&self, restaurant_id: RestaurantId, address: &str) {
        self.restaurants.insert(
            restaurant_id,
            RestaurantInfo {
                address: address.to_string(),
                status: "open".to_string(),
            },
        );
    }

    pub fn put_menu_item(
        &self,
        restaurant_id: RestaurantId,
        item_id: MenuItemId,
        price: f64,
        available: bool,
    ) {
        self.menu_items
            .insert((restaurant_id, item_id), MenuItem { price, available });
    }
}

#[async_trait]
impl RestaurantDirectory for InMemoryRestaurantDirectory {
    async fn get_info(&self, restaurant_id: RestaurantId) -> Result<RestaurantInfo, AppError> {
        self.outage.check("restaurant directory")?;
        self.restaurants
            .get(&restaurant_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("restaurant {restaurant_id} not found")))
    }

    async fn get_menu_item(
        &self,
        restaurant_id: RestaurantId,
        item_id: MenuItemId,
    ) -> Result<MenuItem, AppError> {
        self.outage.check("restaurant directory")?;
        self.menu_items
            .get(&(restaurant_id, item_id))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "menu item {item_id} of restaurant {restaurant_id} not found"
                ))
            })
    }
}

#[derive(Default)]
pub struct StaticGeocoder {
    addresses: DashMap<String, Coordinate>,
    pub outage: Outage,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, address: &str, coord: Coordinate) {
        self.addresses.insert(address.to_string(), coord);
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn resolve(&self, address: &str) -> Result<Coordinate, AppError> {
        self.outage.check("geocoder")?;
        self.addresses
            .get(address)
            .map(|entry| *entry.value())
            .ok_or_else(|| AppError::Dependency(format!("no location found for address {address:?}")))
    }
}

/// Routes along the great circle unless a fixed distance is configured.
#[derive(Default)]
pub struct InMemoryRouter {
    fixed_km: Option<f64>,
    pub outage: Outage,
}

impl InMemoryRouter {
    pub fn straight_line() -> Self {
        Self::default()
    }

    pub fn fixed(km: f64) -> Self {
        Self {
            fixed_km: Some(km),
            outage: Outage::default(),
        }
    }
}

#[async_trait]
impl RoutingProvider for InMemoryRouter {
    async fn distance_km(&self, from: &Coordinate, to: &Coordinate) -> Result<f64, AppError> {
        self.outage.check("routing provider")?;
        Ok(self.fixed_km.unwrap_or_else(|| haversine_km(from, to)))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    busy: Mutex<Vec<CourierId>>,
    pub outage: Outage,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notified(&self) -> Vec<CourierId> {
        self.busy.lock().await.clone()
    }
}

#[async_trait]
impl CourierStatusNotifier for RecordingNotifier {
    async fn set_busy(&self, courier_id: CourierId) -> Result<(), AppError> {
        self.outage.check("courier status notifier")?;
        self.busy.lock().await.push(courier_id);
        Ok(())
    }
}
