use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::bus::{EventPublisher, MessageHandler, Record, ASSIGNMENT_EVENTS_TOPIC};
use crate::error::AppError;
use crate::external::{
    bounded, CourierStatusNotifier, Geocoder, RestaurantDirectory, RoutingProvider,
    DEFAULT_CALL_TIMEOUT,
};
use crate::geo::index::{CourierPool, GeoMatch};
use crate::models::courier::Coordinate;
use crate::models::events::{AssignmentResult, Decoded, Event, OrderCreated};
use crate::models::order::{OrderId, RestaurantId};
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct AssignmentSettings {
    pub radius_km: f64,
    pub max_claim_attempts: usize,
    pub call_timeout: Duration,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            radius_km: 100.0,
            max_claim_attempts: 10,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Services the engine consults while matching.
#[derive(Clone)]
pub struct Collaborators {
    pub restaurants: Arc<dyn RestaurantDirectory>,
    pub geocoder: Arc<dyn Geocoder>,
    pub router: Arc<dyn RoutingProvider>,
    pub notifier: Arc<dyn CourierStatusNotifier>,
}

/// Turns `order_created` events into `assign_shipper` results.
///
/// Nothing that affects the order is committed before the result is
/// published, so a failed run can be replayed from the start. A replay may
/// pick a different courier than the aborted attempt. Once a result has been
/// published it is final: later deliveries of the same order re-publish it
/// instead of matching again.
pub struct AssignmentEngine {
    pool: Arc<dyn CourierPool>,
    collaborators: Collaborators,
    publisher: Arc<dyn EventPublisher>,
    settings: AssignmentSettings,
    metrics: Metrics,
    published: DashMap<OrderId, AssignmentResult>,
}

fn as_dependency(err: AppError) -> AppError {
    match err {
        AppError::Dependency(_) => err,
        other => AppError::Dependency(other.to_string()),
    }
}

impl AssignmentEngine {
    pub fn new(
        pool: Arc<dyn CourierPool>,
        collaborators: Collaborators,
        publisher: Arc<dyn EventPublisher>,
        settings: AssignmentSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            pool,
            collaborators,
            publisher,
            settings,
            metrics,
            published: DashMap::new(),
        }
    }

    /// The result already published for `order_id`, if any.
    pub fn published_result(&self, order_id: OrderId) -> Option<AssignmentResult> {
        self.published.get(&order_id).map(|entry| *entry.value())
    }

    pub async fn process(&self, request: OrderCreated) -> Result<AssignmentResult, AppError> {
        let start = Instant::now();
        let result = self.assign(request).await;

        let outcome = match &result {
            Ok(assignment) if assignment.is_match() => "assigned",
            Ok(_) => "no_match",
            Err(_) => "error",
        };
        self.metrics
            .assignment_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn assign(&self, request: OrderCreated) -> Result<AssignmentResult, AppError> {
        if let Some(previous) = self.published_result(request.order_id) {
            info!(
                order_id = request.order_id,
                courier_id = previous.courier_id,
                "order already assigned, publishing the recorded result again"
            );
            self.emit(&previous).await?;
            return Ok(previous);
        }

        let origin = self.locate_restaurant(request.restaurant_id).await?;

        let Some(candidate) = self.claim_nearest(request.order_id, &origin).await? else {
            info!(
                order_id = request.order_id,
                radius_km = self.settings.radius_km,
                "no available courier in range"
            );
            let result = AssignmentResult::no_match(request.order_id);
            self.emit(&result).await?;
            return Ok(result);
        };

        match self.price_and_emit(request.order_id, &origin, &candidate).await {
            Ok(result) => {
                info!(
                    order_id = result.order_id,
                    courier_id = result.courier_id,
                    distance_km = result.distance_km,
                    "courier assigned"
                );
                Ok(result)
            }
            Err(err) => {
                if self.pool.release(candidate.courier_id).await {
                    warn!(
                        order_id = request.order_id,
                        courier_id = candidate.courier_id,
                        "released courier after failed assignment"
                    );
                }
                Err(err)
            }
        }
    }

    async fn locate_restaurant(&self, restaurant_id: RestaurantId) -> Result<Coordinate, AppError> {
        let timeout = self.settings.call_timeout;
        let info = bounded(
            "restaurant directory",
            timeout,
            self.collaborators.restaurants.get_info(restaurant_id),
        )
        .await
        .map_err(as_dependency)?;

        let coord = bounded(
            "geocoder",
            timeout,
            self.collaborators.geocoder.resolve(&info.address),
        )
        .await
        .map_err(as_dependency)?;

        debug!(
            restaurant_id,
            longitude = coord.longitude,
            latitude = coord.latitude,
            "restaurant located"
        );
        Ok(coord)
    }

    /// Claims the nearest available courier, moving on to the next nearest
    /// whenever a concurrent assignment wins the claim.
    async fn claim_nearest(
        &self,
        order_id: OrderId,
        origin: &Coordinate,
    ) -> Result<Option<GeoMatch>, AppError> {
        for attempt in 1..=self.settings.max_claim_attempts {
            let Some(candidate) = self
                .pool
                .find_nearest_available(origin, self.settings.radius_km)
                .await
            else {
                return Ok(None);
            };

            if self.pool.claim(candidate.courier_id).await {
                return Ok(Some(candidate));
            }

            self.metrics.claim_conflicts_total.inc();
            debug!(
                order_id,
                courier_id = candidate.courier_id,
                attempt,
                "courier taken by a concurrent assignment, searching again"
            );
        }

        Err(AppError::Dependency(format!(
            "order {order_id}: no claim succeeded after {} attempts",
            self.settings.max_claim_attempts
        )))
    }

    async fn price_and_emit(
        &self,
        order_id: OrderId,
        origin: &Coordinate,
        candidate: &GeoMatch,
    ) -> Result<AssignmentResult, AppError> {
        let courier_id = candidate.courier_id;
        let timeout = self.settings.call_timeout;

        let courier_coord = self
            .pool
            .last_coordinate(courier_id)
            .await
            .map_err(as_dependency)?;

        let distance_km = bounded(
            "routing provider",
            timeout,
            self.collaborators.router.distance_km(origin, &courier_coord),
        )
        .await
        .map_err(as_dependency)?;

        if let Err(err) = bounded(
            "courier status notifier",
            timeout,
            self.collaborators.notifier.set_busy(courier_id),
        )
        .await
        {
            warn!(courier_id, error = %err, "courier service not told about busy status");
        }

        let result = AssignmentResult {
            order_id,
            courier_id,
            distance_km,
        };
        self.emit(&result).await?;
        Ok(result)
    }

    async fn emit(&self, result: &AssignmentResult) -> Result<(), AppError> {
        let payload = Event::AssignShipper(*result).encode()?;
        self.publisher
            .publish(ASSIGNMENT_EVENTS_TOPIC, &result.order_id.to_string(), payload)
            .await
            .map_err(as_dependency)?;
        self.published.insert(result.order_id, *result);
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for AssignmentEngine {
    async fn handle(&self, record: &Record) -> Result<(), AppError> {
        match Event::decode(&record.payload)? {
            Decoded::Event(Event::OrderCreated(request)) => {
                if let Err(err) = self.process(request).await {
                    error!(
                        order_id = request.order_id,
                        message_id = %record.id,
                        error = %err,
                        "assignment failed"
                    );
                    return Err(err);
                }
                Ok(())
            }
            Decoded::Event(other) => {
                debug!(event_name = other.name(), "skipping event not addressed to assignment");
                Ok(())
            }
            Decoded::Ignored(name) => {
                debug!(event_name = %name, "skipping unknown event");
                Ok(())
            }
        }
    }
}
