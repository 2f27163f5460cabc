//! Mapbox geocoding and driving-directions adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::AppError;
use crate::external::{Geocoder, RoutingProvider};
use crate::models::courier::Coordinate;

const METRES_PER_KM: f64 = 1_000.0;

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    /// Metres.
    distance: f64,
}

#[derive(Clone)]
pub struct MapboxClient {
    base_url: String,
    token: String,
    client: Client,
}

impl MapboxClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        }
    }

    async fn fetch<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        what: &str,
    ) -> Result<T, AppError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("access_token", self.token.as_str())])
            .send()
            .await
            .map_err(|err| AppError::Dependency(format!("{what} request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Dependency(format!(
                "mapbox {what} responded with {}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| AppError::Dependency(format!("mapbox {what} returned invalid json: {err}")))
    }
}

fn first_coordinate(response: GeocodingResponse, address: &str) -> Result<Coordinate, AppError> {
    let feature = response
        .features
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Dependency(format!("no location found for address {address:?}")))?;

    match feature.geometry.coordinates.as_slice() {
        [longitude, latitude, ..] => Ok(Coordinate::new(*longitude, *latitude)),
        _ => Err(AppError::Dependency(format!(
            "invalid coordinates for address {address:?}"
        ))),
    }
}

fn first_route_km(response: DirectionsResponse) -> Result<f64, AppError> {
    response
        .routes
        .first()
        .map(|route| route.distance / METRES_PER_KM)
        .ok_or_else(|| AppError::Dependency("no driving route found".to_string()))
}

#[async_trait]
impl Geocoder for MapboxClient {
    async fn resolve(&self, address: &str) -> Result<Coordinate, AppError> {
        let response: GeocodingResponse =
            self.fetch(&geocoding_path(address), "geocoding").await?;
        let coord = first_coordinate(response, address)?;
        debug!(address, longitude = coord.longitude, latitude = coord.latitude, "address geocoded");
        Ok(coord)
    }
}

#[async_trait]
impl RoutingProvider for MapboxClient {
    async fn distance_km(&self, from: &Coordinate, to: &Coordinate) -> Result<f64, AppError> {
        let path = format!(
            "/directions/v5/mapbox/driving/{},{};{},{}",
            from.longitude, from.latitude, to.longitude, to.latitude
        );
        let response: DirectionsResponse = self.fetch(&path, "directions").await?;
        first_route_km(response)
    }
}

fn geocoding_path(address: &str) -> String {
    format!(
        "/geocoding/v5/mapbox.places/{}.json",
        urlencoding::encode(address)
    )
}
