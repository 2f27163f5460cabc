pub mod pricing;
pub mod repository;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bus::{EventPublisher, MessageHandler, Record, ORDER_EVENTS_TOPIC};
use crate::error::AppError;
use crate::external::{bounded, RestaurantDirectory};
use crate::models::courier::CourierId;
use crate::models::events::{AssignmentResult, Decoded, Event, OrderCreated};
use crate::models::order::{NewOrder, Order, OrderId, OrderLine, OrderStatus, PricedLine, RestaurantId};
use crate::observability::metrics::Metrics;
use crate::orders::pricing::{delivery_price, items_price};
use crate::orders::repository::OrderRepository;

/// Creates orders and finalizes them from assignment results.
pub struct OrderLifecycle {
    repo: Arc<dyn OrderRepository>,
    restaurants: Arc<dyn RestaurantDirectory>,
    publisher: Arc<dyn EventPublisher>,
    call_timeout: Duration,
    metrics: Metrics,
    updates_tx: broadcast::Sender<Order>,
}

struct Finalized {
    status: OrderStatus,
    courier_id: CourierId,
    delivery_price: f64,
}

impl OrderLifecycle {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        restaurants: Arc<dyn RestaurantDirectory>,
        publisher: Arc<dyn EventPublisher>,
        call_timeout: Duration,
        metrics: Metrics,
        updates_tx: broadcast::Sender<Order>,
    ) -> Self {
        Self {
            repo,
            restaurants,
            publisher,
            call_timeout,
            metrics,
            updates_tx,
        }
    }

    pub async fn get_order(&self, id: OrderId) -> Result<Order, AppError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
    }

    pub async fn order_count(&self) -> Result<usize, AppError> {
        self.repo.count().await
    }

    pub async fn orders_for_customer(&self, customer_id: u64) -> Result<Vec<Order>, AppError> {
        self.repo.find_by_customer(customer_id).await
    }

    pub async fn orders_for_restaurant(
        &self,
        restaurant_id: RestaurantId,
    ) -> Result<Vec<Order>, AppError> {
        self.repo.find_by_restaurant(restaurant_id).await
    }

    /// Orders handed to a courier. Id 0 marks unassigned orders and is not a
    /// courier.
    pub async fn orders_for_courier(&self, courier_id: CourierId) -> Result<Vec<Order>, AppError> {
        if courier_id == 0 {
            return Err(AppError::Validation("courier id must be > 0".to_string()));
        }
        self.repo.find_by_courier(courier_id).await
    }

    pub async fn create_order(
        &self,
        customer_id: u64,
        restaurant_id: RestaurantId,
        lines: Vec<OrderLine>,
    ) -> Result<Order, AppError> {
        if lines.is_empty() {
            return Err(AppError::Validation(
                "an order needs at least one item".to_string(),
            ));
        }
        if let Some(line) = lines.iter().find(|line| line.quantity == 0) {
            return Err(AppError::Validation(format!(
                "quantity of menu item {} must be > 0",
                line.menu_item_id
            )));
        }

        bounded(
            "restaurant directory",
            self.call_timeout,
            self.restaurants.get_info(restaurant_id),
        )
        .await?;

        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let item = bounded(
                "restaurant directory",
                self.call_timeout,
                self.restaurants.get_menu_item(restaurant_id, line.menu_item_id),
            )
            .await?;

            if !item.available {
                return Err(AppError::Unavailable(format!(
                    "menu item {} is not available",
                    line.menu_item_id
                )));
            }

            priced.push(PricedLine {
                menu_item_id: line.menu_item_id,
                quantity: line.quantity,
                unit_price: item.price,
            });
        }

        let items_price = items_price(&priced);
        let order = self
            .repo
            .create(NewOrder {
                customer_id,
                restaurant_id,
                lines: priced,
                items_price,
            })
            .await?;

        self.metrics
            .orders_total
            .with_label_values(&[OrderStatus::Created.as_str()])
            .inc();
        info!(
            order_id = order.id,
            customer_id,
            restaurant_id,
            items_price,
            "order created"
        );

        let event = Event::OrderCreated(OrderCreated {
            order_id: order.id,
            restaurant_id,
        });
        if let Err(err) = self
            .publisher
            .publish(ORDER_EVENTS_TOPIC, &order.id.to_string(), event.encode()?)
            .await
        {
            warn!(
                order_id = order.id,
                error = %err,
                "order persisted but order_created was not published; it stays created"
            );
            return Err(AppError::Dependency(format!(
                "order {} was created but could not be queued for assignment: {err}",
                order.id
            )));
        }

        Ok(order)
    }

    /// Moves a `created` order to `delivering` or `cancelled`. Safe to call
    /// again with the same result.
    pub async fn apply_assignment_result(&self, result: AssignmentResult) -> Result<Order, AppError> {
        let target = finalized_state(&result)?;
        let mut order = self.get_order(result.order_id).await?;

        let already_applied = order.status == target.status
            && order.courier_id == target.courier_id
            && order.delivery_price == target.delivery_price;
        if already_applied {
            debug!(order_id = order.id, "assignment result already applied");
            return Ok(order);
        }

        if order.status != OrderStatus::Created {
            warn!(
                order_id = order.id,
                status = order.status.as_str(),
                courier_id = result.courier_id,
                "order already finalized, ignoring assignment result"
            );
            return Ok(order);
        }

        order.status = target.status;
        order.courier_id = target.courier_id;
        order.delivery_price = target.delivery_price;
        order.total_price = order.items_price + order.delivery_price;
        order.updated_at = Utc::now();
        self.repo.save(&order).await?;

        self.metrics
            .orders_total
            .with_label_values(&[order.status.as_str()])
            .inc();
        info!(
            order_id = order.id,
            status = order.status.as_str(),
            courier_id = order.courier_id,
            delivery_price = order.delivery_price,
            total_price = order.total_price,
            "order finalized"
        );
        let _ = self.updates_tx.send(order.clone());

        Ok(order)
    }
}

fn finalized_state(result: &AssignmentResult) -> Result<Finalized, AppError> {
    if !result.is_match() {
        return Ok(Finalized {
            status: OrderStatus::Cancelled,
            courier_id: 0,
            delivery_price: 0.0,
        });
    }

    if !result.distance_km.is_finite() || result.distance_km < 0.0 {
        return Err(AppError::Validation(format!(
            "invalid distance {} for order {}",
            result.distance_km, result.order_id
        )));
    }

    Ok(Finalized {
        status: OrderStatus::Delivering,
        courier_id: result.courier_id,
        delivery_price: delivery_price(result.distance_km),
    })
}

#[async_trait]
impl MessageHandler for OrderLifecycle {
    async fn handle(&self, record: &Record) -> Result<(), AppError> {
        match Event::decode(&record.payload)? {
            Decoded::Event(Event::AssignShipper(result)) => {
                self.apply_assignment_result(result).await?;
                Ok(())
            }
            Decoded::Event(other) => {
                debug!(event_name = other.name(), "skipping event not addressed to orders");
                Ok(())
            }
            Decoded::Ignored(name) => {
                debug!(event_name = %name, "skipping unknown event");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::OrderLifecycle;
    use crate::bus::{EventBus, EventPublisher, ORDER_EVENTS_TOPIC};
    use crate::error::AppError;
    use crate::external::memory::InMemoryRestaurantDirectory;
    use crate::external::DEFAULT_CALL_TIMEOUT;
    use crate::models::events::{AssignmentResult, Decoded, Event, OrderCreated};
    use crate::models::order::{Order, OrderLine, OrderStatus};
    use crate::observability::metrics::Metrics;
    use crate::orders::repository::InMemoryOrderRepository;

    struct Fixture {
        orders: OrderLifecycle,
        bus: Arc<EventBus>,
        catalog: Arc<InMemoryRestaurantDirectory>,
    }

    fn fixture_with(publisher: Option<Arc<dyn EventPublisher>>) -> Fixture {
        let bus = Arc::new(EventBus::new(2));
        let catalog = Arc::new(InMemoryRestaurantDirectory::new());
        catalog.put_restaurant(3, "1 Le Loi, District 1");
        catalog.put_menu_item(3, 10, 5.0, true);
        catalog.put_menu_item(3, 11, 2.5, true);
        catalog.put_menu_item(3, 12, 9.0, false);

        let (updates_tx, _) = broadcast::channel(16);
        let orders = OrderLifecycle::new(
            Arc::new(InMemoryOrderRepository::new()),
            catalog.clone(),
            publisher.unwrap_or_else(|| bus.clone() as Arc<dyn EventPublisher>),
            DEFAULT_CALL_TIMEOUT,
            Metrics::new(),
            updates_tx,
        );

        Fixture { orders, bus, catalog }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    fn line(menu_item_id: u64, quantity: u32) -> OrderLine {
        OrderLine {
            menu_item_id,
            quantity,
        }
    }

    fn assert_total_consistent(order: &Order) {
        assert_eq!(order.total_price, order.items_price + order.delivery_price);
    }

    struct BrokenPublisher;

    #[async_trait]
    impl EventPublisher for BrokenPublisher {
        async fn publish(&self, _topic: &str, _key: &str, _payload: String) -> Result<(), AppError> {
            Err(AppError::Dependency("broker unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn create_order_prices_items_and_emits_once() {
        let fx = fixture();
        let order = fx.orders.create_order(7, 3, vec![line(10, 2)]).await.unwrap();

        assert_eq!(order.items_price, 10.0);
        assert_eq!(order.delivery_price, 0.0);
        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.courier_id, 0);
        assert_eq!(order.items[0].unit_price, 5.0);
        assert_total_consistent(&order);

        let records = fx.bus.records(ORDER_EVENTS_TOPIC).await;
        assert_eq!(records.len(), 1);
        assert_eq!(
            Event::decode(&records[0].payload).unwrap(),
            Decoded::Event(Event::OrderCreated(OrderCreated {
                order_id: order.id,
                restaurant_id: 3,
            }))
        );
    }

    #[tokio::test]
    async fn unit_prices_are_snapshots() {
        let fx = fixture();
        let order = fx
            .orders
            .create_order(7, 3, vec![line(10, 1), line(11, 4)])
            .await
            .unwrap();
        fx.catalog.put_menu_item(3, 10, 99.0, true);

        let stored = fx.orders.get_order(order.id).await.unwrap();
        assert_eq!(stored.items_price, 15.0);
        assert_eq!(stored.items[0].unit_price, 5.0);
    }

    #[tokio::test]
    async fn catalog_rejections_surface_their_kind() {
        let fx = fixture();

        let err = fx.orders.create_order(7, 4, vec![line(10, 1)]).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let err = fx.orders.create_order(7, 3, vec![line(99, 1)]).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let err = fx.orders.create_order(7, 3, vec![line(12, 1)]).await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");

        let err = fx.orders.create_order(7, 3, vec![]).await.unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = fx.orders.create_order(7, 3, vec![line(10, 0)]).await.unwrap_err();
        assert_eq!(err.kind(), "validation");

        assert_eq!(fx.orders.order_count().await.unwrap(), 0);
        assert!(fx.bus.records(ORDER_EVENTS_TOPIC).await.is_empty());
    }

    #[tokio::test]
    async fn catalog_outage_is_a_dependency_error() {
        let fx = fixture();
        fx.catalog.outage.fail_next(1);

        let err = fx.orders.create_order(7, 3, vec![line(10, 1)]).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn failed_emission_leaves_order_created() {
        let fx = fixture_with(Some(Arc::new(BrokenPublisher)));

        let err = fx.orders.create_order(7, 3, vec![line(10, 1)]).await.unwrap_err();
        assert_eq!(err.kind(), "dependency");

        let stored = fx.orders.get_order(1).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Created);
    }

    #[tokio::test]
    async fn match_moves_order_to_delivering_with_fee() {
        let fx = fixture();
        let order = fx.orders.create_order(7, 3, vec![line(10, 2)]).await.unwrap();

        let finalized = fx
            .orders
            .apply_assignment_result(AssignmentResult {
                order_id: order.id,
                courier_id: 42,
                distance_km: 20.0,
            })
            .await
            .unwrap();

        assert_eq!(finalized.status, OrderStatus::Delivering);
        assert_eq!(finalized.courier_id, 42);
        assert_eq!(finalized.delivery_price, 1.0);
        assert_eq!(finalized.total_price, 11.0);
        assert_total_consistent(&finalized);
    }

    #[tokio::test]
    async fn no_match_cancels_order() {
        let fx = fixture();
        let order = fx.orders.create_order(7, 3, vec![line(10, 2)]).await.unwrap();

        let finalized = fx
            .orders
            .apply_assignment_result(AssignmentResult::no_match(order.id))
            .await
            .unwrap();

        assert_eq!(finalized.status, OrderStatus::Cancelled);
        assert_eq!(finalized.courier_id, 0);
        assert_eq!(finalized.delivery_price, 0.0);
        assert_eq!(finalized.total_price, finalized.items_price);
    }

    #[tokio::test]
    async fn reapplying_a_result_is_a_no_op() {
        let fx = fixture();
        let order = fx.orders.create_order(7, 3, vec![line(10, 2)]).await.unwrap();
        let result = AssignmentResult {
            order_id: order.id,
            courier_id: 42,
            distance_km: 7.3,
        };

        let once = fx.orders.apply_assignment_result(result).await.unwrap();
        let twice = fx.orders.apply_assignment_result(result).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(fx.orders.get_order(order.id).await.unwrap(), once);
    }

    #[tokio::test]
    async fn finalized_orders_ignore_conflicting_results() {
        let fx = fixture();
        let order = fx.orders.create_order(7, 3, vec![line(10, 2)]).await.unwrap();
        let first = fx
            .orders
            .apply_assignment_result(AssignmentResult {
                order_id: order.id,
                courier_id: 42,
                distance_km: 4.0,
            })
            .await
            .unwrap();

        let after = fx
            .orders
            .apply_assignment_result(AssignmentResult::no_match(order.id))
            .await
            .unwrap();
        assert_eq!(after, first);
        assert_eq!(after.status, OrderStatus::Delivering);
    }

    #[tokio::test]
    async fn unknown_order_and_bad_distance_are_not_retried() {
        let fx = fixture();

        let err = fx
            .orders
            .apply_assignment_result(AssignmentResult::no_match(404))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(!err.is_retryable());

        let order = fx.orders.create_order(7, 3, vec![line(10, 1)]).await.unwrap();
        let err = fx
            .orders
            .apply_assignment_result(AssignmentResult {
                order_id: order.id,
                courier_id: 5,
                distance_km: -1.0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn courier_orders_follow_assignment() {
        let fx = fixture();
        let assigned = fx.orders.create_order(7, 3, vec![line(10, 1)]).await.unwrap();
        fx.orders.create_order(8, 3, vec![line(11, 1)]).await.unwrap();

        assert!(fx.orders.orders_for_courier(42).await.unwrap().is_empty());
        fx.orders
            .apply_assignment_result(AssignmentResult {
                order_id: assigned.id,
                courier_id: 42,
                distance_km: 4.0,
            })
            .await
            .unwrap();

        let orders = fx.orders.orders_for_courier(42).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, assigned.id);
        assert_eq!(orders[0].status, OrderStatus::Delivering);
        assert_eq!(fx.orders.orders_for_customer(7).await.unwrap().len(), 1);
        assert_eq!(fx.orders.orders_for_restaurant(3).await.unwrap().len(), 2);
        assert_eq!(
            fx.orders.orders_for_courier(0).await.unwrap_err().kind(),
            "validation"
        );
    }
}
