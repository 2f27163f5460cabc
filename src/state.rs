use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bus::{Consumer, EventBus, ASSIGNMENT_EVENTS_TOPIC, ORDER_EVENTS_TOPIC};
use crate::config::Config;
use crate::couriers::CourierLifecycle;
use crate::engine::assignment::{AssignmentEngine, AssignmentSettings, Collaborators};
use crate::geo::index::{GeoIndex, DEFAULT_CANDIDATE_LIMIT};
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::orders::repository::OrderRepository;
use crate::orders::OrderLifecycle;

pub const ASSIGNMENT_GROUP: &str = "assignment-engine";
pub const ORDER_GROUP: &str = "order-lifecycle";

#[derive(Debug, Clone)]
pub struct StateOptions {
    pub bus_partitions: usize,
    pub event_buffer_size: usize,
    pub candidate_limit: usize,
    pub redelivery_backoff: Duration,
    pub assignment: AssignmentSettings,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            bus_partitions: 4,
            event_buffer_size: 1024,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            redelivery_backoff: Duration::from_millis(500),
            assignment: AssignmentSettings::default(),
        }
    }
}

impl From<&Config> for StateOptions {
    fn from(config: &Config) -> Self {
        Self {
            bus_partitions: config.bus_partitions,
            event_buffer_size: config.event_buffer_size,
            candidate_limit: config.candidate_limit,
            redelivery_backoff: config.redelivery_backoff,
            assignment: config.assignment_settings(),
        }
    }
}

pub struct AppState {
    pub geo: Arc<GeoIndex>,
    pub couriers: CourierLifecycle,
    pub orders: Arc<OrderLifecycle>,
    pub engine: Arc<AssignmentEngine>,
    pub bus: Arc<EventBus>,
    pub order_updates_tx: broadcast::Sender<Order>,
    pub metrics: Metrics,
    redelivery_backoff: Duration,
}

impl AppState {
    pub fn new(
        options: &StateOptions,
        repo: Arc<dyn OrderRepository>,
        collaborators: Collaborators,
    ) -> Self {
        let metrics = Metrics::new();
        let bus = Arc::new(EventBus::new(options.bus_partitions));
        let geo = Arc::new(GeoIndex::new(options.candidate_limit));
        let (order_updates_tx, _unused_rx) = broadcast::channel(options.event_buffer_size);

        let orders = Arc::new(OrderLifecycle::new(
            repo,
            collaborators.restaurants.clone(),
            bus.clone(),
            options.assignment.call_timeout,
            metrics.clone(),
            order_updates_tx.clone(),
        ));

        let engine = Arc::new(AssignmentEngine::new(
            geo.clone(),
            collaborators,
            bus.clone(),
            options.assignment.clone(),
            metrics.clone(),
        ));

        Self {
            couriers: CourierLifecycle::new(geo.clone()),
            geo,
            orders,
            engine,
            bus,
            order_updates_tx,
            metrics,
            redelivery_backoff: options.redelivery_backoff,
        }
    }

    /// Starts one loop per partition for the assignment engine and one for
    /// order finalization.
    pub fn spawn_consumers(&self) -> Vec<JoinHandle<()>> {
        let assignment = Consumer {
            bus: self.bus.clone(),
            topic: ORDER_EVENTS_TOPIC.to_string(),
            group: ASSIGNMENT_GROUP.to_string(),
            handler: self.engine.clone(),
            redelivery_backoff: self.redelivery_backoff,
            metrics: self.metrics.clone(),
        };
        let finalization = Consumer {
            bus: self.bus.clone(),
            topic: ASSIGNMENT_EVENTS_TOPIC.to_string(),
            group: ORDER_GROUP.to_string(),
            handler: self.orders.clone(),
            redelivery_backoff: self.redelivery_backoff,
            metrics: self.metrics.clone(),
        };

        let mut handles = assignment.spawn();
        handles.extend(finalization.spawn());
        handles
    }
}
