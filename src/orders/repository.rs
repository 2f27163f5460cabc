use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::AppError;
use crate::models::courier::CourierId;
use crate::models::order::{NewOrder, Order, OrderId, OrderItem, OrderStatus, RestaurantId};

/// Persistence port for orders. Items are stored and removed together with
/// their order.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order in `created` status with no delivery fee.
    async fn create(&self, order: NewOrder) -> Result<Order, AppError>;

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, AppError>;

    async fn save(&self, order: &Order) -> Result<(), AppError>;

    /// Orders placed by a customer, oldest first.
    async fn find_by_customer(&self, customer_id: u64) -> Result<Vec<Order>, AppError>;

    async fn find_by_restaurant(&self, restaurant_id: RestaurantId)
    -> Result<Vec<Order>, AppError>;

    async fn find_by_courier(&self, courier_id: CourierId) -> Result<Vec<Order>, AppError>;

    async fn count(&self) -> Result<usize, AppError>;
}

pub struct InMemoryOrderRepository {
    orders: DashMap<OrderId, Order>,
    next_order_id: AtomicU64,
    next_item_id: AtomicU64,
}

impl Default for InMemoryOrderRepository {
    fn default() -> Self {
        Self {
            orders: DashMap::new(),
            next_order_id: AtomicU64::new(1),
            next_item_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn matching(&self, keep: impl Fn(&Order) -> bool) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_unstable_by_key(|order| order.id);
        orders
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: NewOrder) -> Result<Order, AppError> {
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();

        let items = order
            .lines
            .into_iter()
            .map(|line| OrderItem {
                id: self.next_item_id.fetch_add(1, Ordering::SeqCst),
                order_id: id,
                menu_item_id: line.menu_item_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
            .collect();

        let stored = Order {
            id,
            customer_id: order.customer_id,
            restaurant_id: order.restaurant_id,
            courier_id: 0,
            items,
            items_price: order.items_price,
            delivery_price: 0.0,
            total_price: order.items_price,
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
        };

        self.orders.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, AppError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, order: &Order) -> Result<(), AppError> {
        let mut stored = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| AppError::NotFound(format!("order {} not found", order.id)))?;
        *stored = order.clone();
        Ok(())
    }

    async fn find_by_customer(&self, customer_id: u64) -> Result<Vec<Order>, AppError> {
        Ok(self.matching(|order| order.customer_id == customer_id))
    }

    async fn find_by_restaurant(
        &self,
        restaurant_id: RestaurantId,
    ) -> Result<Vec<Order>, AppError> {
        Ok(self.matching(|order| order.restaurant_id == restaurant_id))
    }

    async fn find_by_courier(&self, courier_id: CourierId) -> Result<Vec<Order>, AppError> {
        Ok(self.matching(|order| order.courier_id == courier_id))
    }

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.orders.len())
    }
}
