use std::sync::Arc;

use tracing::{debug, info};

use crate::error::AppError;
use crate::geo::index::{GeoIndex, GeoSet};
use crate::geo::validate_coordinate;
use crate::models::courier::{Coordinate, CourierId, CourierLocation, CourierStatus};

/// Owns courier status transitions and keeps geoset membership in step with
/// the status record.
#[derive(Clone)]
pub struct CourierLifecycle {
    geo: Arc<GeoIndex>,
}

impl CourierLifecycle {
    pub fn new(geo: Arc<GeoIndex>) -> Self {
        Self { geo }
    }

    pub async fn register(&self, courier_id: CourierId) -> Result<CourierLocation, AppError> {
        if courier_id == 0 {
            return Err(AppError::Validation("courier id must be > 0".to_string()));
        }

        let courier = self.geo.register(courier_id).await?;
        info!(courier_id, "courier registered");
        Ok(courier)
    }

    pub async fn get(&self, courier_id: CourierId) -> Result<CourierLocation, AppError> {
        self.geo.location(courier_id).await
    }

    pub async fn list(&self, status: Option<CourierStatus>) -> Vec<CourierLocation> {
        self.geo.list(status).await
    }

    /// Indexed position of an available or busy courier.
    pub async fn current_location(&self, courier_id: CourierId) -> Result<Coordinate, AppError> {
        let courier = self.geo.location(courier_id).await?;
        if courier.status == CourierStatus::Offline {
            return Err(AppError::NotFound(format!("courier {courier_id} is offline")));
        }
        courier.coordinate.ok_or_else(|| {
            AppError::NotFound(format!(
                "courier {courier_id} has not reported a location since becoming {}",
                courier.status
            ))
        })
    }

    pub async fn set_location(
        &self,
        courier_id: CourierId,
        coord: Coordinate,
    ) -> Result<CourierLocation, AppError> {
        validate_coordinate(&coord)?;

        match self.geo.upsert_location(courier_id, coord).await? {
            Some(set) => debug!(courier_id, geoset = set.key(), "courier location updated"),
            None => debug!(courier_id, "ignoring location update from offline courier"),
        }

        self.geo.location(courier_id).await
    }

    pub async fn set_status(
        &self,
        courier_id: CourierId,
        status: CourierStatus,
    ) -> Result<CourierLocation, AppError> {
        let previous = self.geo.transition(courier_id, status).await?;

        if let Some(set) = GeoSet::for_status(previous) {
            debug!(courier_id, geoset = set.key(), "courier left geoset");
        }
        info!(
            courier_id,
            from = %previous,
            to = %status,
            "courier status changed"
        );

        self.geo.location(courier_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::CourierLifecycle;
    use crate::geo::index::{GeoIndex, GeoSet};
    use crate::models::courier::{Coordinate, CourierStatus};

    fn lifecycle() -> (CourierLifecycle, Arc<GeoIndex>) {
        let geo = Arc::new(GeoIndex::default());
        (CourierLifecycle::new(geo.clone()), geo)
    }

    #[tokio::test]
    async fn courier_becomes_matchable_only_after_status_and_location() {
        let (couriers, geo) = lifecycle();
        let origin = Coordinate::new(106.70, 10.77);
        let nearby = Coordinate::new(106.71, 10.78);

        couriers.register(42).await.unwrap();
        let view = couriers.set_location(42, nearby).await.unwrap();
        assert_eq!(view.status, CourierStatus::Offline);
        assert!(view.coordinate.is_none());
        assert!(geo.find_nearest_available(&origin, 100.0).await.is_none());

        couriers
            .set_status(42, CourierStatus::Available)
            .await
            .unwrap();
        assert!(geo.find_nearest_available(&origin, 100.0).await.is_none());

        let view = couriers.set_location(42, nearby).await.unwrap();
        assert_eq!(view.coordinate, Some(nearby));
        let nearest = geo.find_nearest_available(&origin, 100.0).await.unwrap();
        assert_eq!(nearest.courier_id, 42);
    }

    #[tokio::test]
    async fn busy_location_updates_go_to_busy_set() {
        let (couriers, geo) = lifecycle();
        couriers.register(9).await.unwrap();
        couriers.set_status(9, CourierStatus::Busy).await.unwrap();
        couriers
            .set_location(9, Coordinate::new(2.35, 48.85))
            .await
            .unwrap();

        assert_eq!(geo.members(GeoSet::Busy).await, vec![9]);
        assert!(geo.members(GeoSet::Available).await.is_empty());
    }

    #[tokio::test]
    async fn going_offline_leaves_every_geoset() {
        let (couriers, geo) = lifecycle();
        couriers.register(3).await.unwrap();
        couriers.set_status(3, CourierStatus::Available).await.unwrap();
        couriers
            .set_location(3, Coordinate::new(2.35, 48.85))
            .await
            .unwrap();

        let view = couriers.set_status(3, CourierStatus::Offline).await.unwrap();
        assert_eq!(view.status, CourierStatus::Offline);
        assert!(geo.members(GeoSet::Available).await.is_empty());
        assert!(geo.members(GeoSet::Busy).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_courier_and_bad_coordinates_are_rejected() {
        let (couriers, _geo) = lifecycle();
        let err = couriers
            .set_status(77, CourierStatus::Available)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        couriers.register(1).await.unwrap();
        let err = couriers
            .set_location(1, Coordinate::new(200.0, 0.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = couriers.register(0).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn current_location_needs_an_indexed_position() {
        let (couriers, _geo) = lifecycle();
        let spot = Coordinate::new(106.71, 10.78);
        couriers.register(5).await.unwrap();
        assert_eq!(couriers.current_location(5).await.unwrap_err().kind(), "not_found");

        couriers.set_status(5, CourierStatus::Available).await.unwrap();
        assert_eq!(couriers.current_location(5).await.unwrap_err().kind(), "not_found");

        couriers.set_location(5, spot).await.unwrap();
        assert_eq!(couriers.current_location(5).await.unwrap(), spot);

        couriers.set_status(5, CourierStatus::Offline).await.unwrap();
        assert_eq!(couriers.current_location(5).await.unwrap_err().kind(), "not_found");
    }
}
