use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};

use crate::error::AppError;
use crate::external::{CourierStatusNotifier, MenuItem, RestaurantDirectory, RestaurantInfo};
use crate::models::courier::{CourierId, CourierStatus};
use crate::models::order::{MenuItemId, RestaurantId};

pub fn build_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))
}

async fn get_json<T: DeserializeOwned>(client: &Client, url: &str, what: &str) -> Result<T, AppError> {
    trace!(url, "sending request");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| AppError::Dependency(format!("{what} request failed: {err}")))?;

    match response.status() {
        status if status.is_success() => response
            .json::<T>()
            .await
            .map_err(|err| AppError::Dependency(format!("{what} returned invalid json: {err}"))),
        StatusCode::NOT_FOUND => Err(AppError::NotFound(format!("{what} not found"))),
        status => Err(AppError::Dependency(format!("{what} responded with {status}"))),
    }
}

/// Restaurant catalog reached over its REST API.
#[derive(Clone)]
pub struct HttpRestaurantDirectory {
    base_url: String,
    client: Client,
}

impl HttpRestaurantDirectory {
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl RestaurantDirectory for HttpRestaurantDirectory {
    async fn get_info(&self, restaurant_id: RestaurantId) -> Result<RestaurantInfo, AppError> {
        let url = format!("{}/restaurants/{restaurant_id}", self.base_url);
        get_json(&self.client, &url, &format!("restaurant {restaurant_id}")).await
    }

    async fn get_menu_item(
        &self,
        restaurant_id: RestaurantId,
        item_id: MenuItemId,
    ) -> Result<MenuItem, AppError> {
        let url = format!(
            "{}/restaurants/{restaurant_id}/menu-items/{item_id}",
            self.base_url
        );
        get_json(
            &self.client,
            &url,
            &format!("menu item {item_id} of restaurant {restaurant_id}"),
        )
        .await
    }
}

/// Pushes busy transitions to the service that owns courier accounts.
#[derive(Clone)]
pub struct HttpCourierStatusNotifier {
    base_url: String,
    client: Client,
}

impl HttpCourierStatusNotifier {
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl CourierStatusNotifier for HttpCourierStatusNotifier {
    async fn set_busy(&self, courier_id: CourierId) -> Result<(), AppError> {
        let url = format!("{}/couriers/{courier_id}/status", self.base_url);
        let response = self
            .client
            .request(Method::PATCH, &url)
            .json(&json!({ "status": CourierStatus::Busy }))
            .send()
            .await
            .map_err(|err| AppError::Dependency(format!("courier status notify failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Dependency(format!(
                "courier service responded with {}",
                response.status()
            )));
        }

        debug!(courier_id, "courier service notified of busy status");
        Ok(())
    }
}
