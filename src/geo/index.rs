//! Courier geo-index.
//!
//! Holds two geosets (`available`, `busy`) keyed by courier id plus one
//! status record per courier. Every public command runs under a single write
//! (or read) lock acquisition, so each one is indivisible with respect to the
//! others; in particular `claim` can never succeed twice for the same courier.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::courier::{Coordinate, CourierId, CourierLocation, CourierStatus};

pub const DEFAULT_CANDIDATE_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeoSet {
    Available,
    Busy,
}

impl GeoSet {
    pub fn key(&self) -> &'static str {
        match self {
            GeoSet::Available => "available",
            GeoSet::Busy => "busy",
        }
    }

    pub fn for_status(status: CourierStatus) -> Option<GeoSet> {
        match status {
            CourierStatus::Available => Some(GeoSet::Available),
            CourierStatus::Busy => Some(GeoSet::Busy),
            CourierStatus::Offline => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoMatch {
    pub courier_id: CourierId,
    pub coordinate: Coordinate,
    pub distance_km: f64,
}

#[derive(Debug, Clone)]
struct StatusRecord {
    status: CourierStatus,
    last_coordinate: Option<Coordinate>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Store {
    available: HashMap<CourierId, Coordinate>,
    busy: HashMap<CourierId, Coordinate>,
    records: HashMap<CourierId, StatusRecord>,
}

impl Store {
    fn set(&self, set: GeoSet) -> &HashMap<CourierId, Coordinate> {
        match set {
            GeoSet::Available => &self.available,
            GeoSet::Busy => &self.busy,
        }
    }

    fn set_mut(&mut self, set: GeoSet) -> &mut HashMap<CourierId, Coordinate> {
        match set {
            GeoSet::Available => &mut self.available,
            GeoSet::Busy => &mut self.busy,
        }
    }

    fn record_mut(&mut self, courier_id: CourierId) -> Result<&mut StatusRecord, AppError> {
        self.records
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))
    }

    fn view(&self, courier_id: CourierId, record: &StatusRecord) -> CourierLocation {
        let coordinate = GeoSet::for_status(record.status)
            .and_then(|set| self.set(set).get(&courier_id).copied());

        CourierLocation {
            courier_id,
            status: record.status,
            coordinate,
            updated_at: record.updated_at,
        }
    }
}

pub struct GeoIndex {
    store: RwLock<Store>,
    candidate_limit: usize,
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CANDIDATE_LIMIT)
    }
}

impl GeoIndex {
    pub fn new(candidate_limit: usize) -> Self {
        Self {
            store: RwLock::new(Store::default()),
            candidate_limit: candidate_limit.max(1),
        }
    }

    /// Creates the status record for a new courier. Couriers start offline
    /// and outside both geosets.
    pub async fn register(&self, courier_id: CourierId) -> Result<CourierLocation, AppError> {
        let mut store = self.store.write().await;
        if store.records.contains_key(&courier_id) {
            return Err(AppError::Conflict(format!(
                "courier {courier_id} is already registered"
            )));
        }

        let record = StatusRecord {
            status: CourierStatus::Offline,
            last_coordinate: None,
            updated_at: Utc::now(),
        };
        let view = store.view(courier_id, &record);
        store.records.insert(courier_id, record);
        Ok(view)
    }

    pub async fn location(&self, courier_id: CourierId) -> Result<CourierLocation, AppError> {
        let store = self.store.read().await;
        let record = store
            .records
            .get(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
        Ok(store.view(courier_id, record))
    }

    pub async fn status(&self, courier_id: CourierId) -> Result<CourierStatus, AppError> {
        Ok(self.location(courier_id).await?.status)
    }

    /// Writes the coordinate into the geoset of the courier's current status.
    /// Returns the geoset written to, or `None` when the courier is offline.
    pub async fn upsert_location(
        &self,
        courier_id: CourierId,
        coord: Coordinate,
    ) -> Result<Option<GeoSet>, AppError> {
        let mut store = self.store.write().await;
        let record = store.record_mut(courier_id)?;
        let Some(set) = GeoSet::for_status(record.status) else {
            return Ok(None);
        };

        record.last_coordinate = Some(coord);
        record.updated_at = Utc::now();
        store.set_mut(set).insert(courier_id, coord);
        Ok(Some(set))
    }

    /// Leaves the geoset of the previous status and stores the new status.
    /// The courier joins the new status's geoset only on its next location
    /// update. Returns the previous status.
    pub async fn transition(
        &self,
        courier_id: CourierId,
        status: CourierStatus,
    ) -> Result<CourierStatus, AppError> {
        let mut store = self.store.write().await;
        let record = store.record_mut(courier_id)?;
        let previous = record.status;
        record.status = status;
        record.updated_at = Utc::now();

        if let Some(set) = GeoSet::for_status(previous) {
            store.set_mut(set).remove(&courier_id);
        }
        Ok(previous)
    }

    /// Members of `set` within `radius_km` of `origin`, nearest first, at most
    /// `limit` entries.
    pub async fn radius(
        &self,
        set: GeoSet,
        origin: &Coordinate,
        radius_km: f64,
        limit: usize,
    ) -> Vec<GeoMatch> {
        let store = self.store.read().await;
        let mut matches: Vec<GeoMatch> = store
            .set(set)
            .iter()
            .filter_map(|(courier_id, coordinate)| {
                let distance_km = haversine_km(origin, coordinate);
                (distance_km <= radius_km).then_some(GeoMatch {
                    courier_id: *courier_id,
                    coordinate: *coordinate,
                    distance_km,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then(a.courier_id.cmp(&b.courier_id))
        });
        matches.truncate(limit);
        matches
    }

    pub async fn find_nearest_available(
        &self,
        origin: &Coordinate,
        radius_km: f64,
    ) -> Option<GeoMatch> {
        self.radius(GeoSet::Available, origin, radius_km, self.candidate_limit)
            .await
            .into_iter()
            .next()
    }

    /// Moves the courier from the available geoset to the busy geoset and marks
    /// it busy. Returns `false` without touching anything when the courier is
    /// no longer available.
    pub async fn claim(&self, courier_id: CourierId) -> bool {
        let mut store = self.store.write().await;
        let claimable = matches!(
            store.records.get(&courier_id),
            Some(record) if record.status == CourierStatus::Available
        );
        if !claimable {
            return false;
        }
        let Some(coord) = store.available.remove(&courier_id) else {
            return false;
        };

        store.busy.insert(courier_id, coord);
        if let Some(record) = store.records.get_mut(&courier_id) {
            record.status = CourierStatus::Busy;
            record.updated_at = Utc::now();
        }
        debug!(courier_id, "courier claimed");
        true
    }

    /// Inverse of [`GeoIndex::claim`]. Only applies while the courier is still
    /// busy and in the busy geoset.
    pub async fn release(&self, courier_id: CourierId) -> bool {
        let mut store = self.store.write().await;
        let releasable = matches!(
            store.records.get(&courier_id),
            Some(record) if record.status == CourierStatus::Busy
        );
        if !releasable {
            return false;
        }
        let Some(coord) = store.busy.remove(&courier_id) else {
            return false;
        };

        store.available.insert(courier_id, coord);
        if let Some(record) = store.records.get_mut(&courier_id) {
            record.status = CourierStatus::Available;
            record.updated_at = Utc::now();
        }
        debug!(courier_id, "courier claim released");
        true
    }

    /// Last reported coordinate, whatever the courier's current status.
    pub async fn last_coordinate(&self, courier_id: CourierId) -> Result<Coordinate, AppError> {
        let store = self.store.read().await;
        let record = store
            .records
            .get(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        record.last_coordinate.ok_or_else(|| {
            AppError::NotFound(format!("courier {courier_id} has no reported location"))
        })
    }

    pub async fn members(&self, set: GeoSet) -> Vec<CourierId> {
        let store = self.store.read().await;
        let mut ids: Vec<CourierId> = store.set(set).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Every registered courier ordered by id, optionally only those with
    /// `status`.
    pub async fn list(&self, status: Option<CourierStatus>) -> Vec<CourierLocation> {
        let store = self.store.read().await;
        let mut couriers: Vec<CourierLocation> = store
            .records
            .iter()
            .filter(|(_, record)| status.is_none_or(|wanted| record.status == wanted))
            .map(|(courier_id, record)| store.view(*courier_id, record))
            .collect();
        couriers.sort_unstable_by_key(|courier| courier.courier_id);
        couriers
    }
}

/// The part of the index the assignment engine matches against.
#[async_trait]
pub trait CourierPool: Send + Sync {
    async fn find_nearest_available(&self, origin: &Coordinate, radius_km: f64)
    -> Option<GeoMatch>;

    async fn claim(&self, courier_id: CourierId) -> bool;

    async fn release(&self, courier_id: CourierId) -> bool;

    async fn last_coordinate(&self, courier_id: CourierId) -> Result<Coordinate, AppError>;
}

#[async_trait]
impl CourierPool for GeoIndex {
    async fn find_nearest_available(
        &self,
        origin: &Coordinate,
        radius_km: f64,
    ) -> Option<GeoMatch> {
        GeoIndex::find_nearest_available(self, origin, radius_km).await
    }

    async fn claim(&self, courier_id: CourierId) -> bool {
        GeoIndex::claim(self, courier_id).await
    }

    async fn release(&self, courier_id: CourierId) -> bool {
        GeoIndex::release(self, courier_id).await
    }

    async fn last_coordinate(&self, courier_id: CourierId) -> Result<Coordinate, AppError> {
        GeoIndex::last_coordinate(self, courier_id).await
    }
}
