use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::courier::CourierId;

pub type OrderId = u64;
pub type RestaurantId = u64;
pub type MenuItemId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Delivering,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub id: u64,
    pub order_id: OrderId,
    pub menu_item_id: MenuItemId,
    pub quantity: u32,
    /// Catalog price captured when the order was placed.
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: u64,
    pub restaurant_id: RestaurantId,
    /// 0 while unassigned.
    pub courier_id: CourierId,
    pub items: Vec<OrderItem>,
    pub items_price: f64,
    pub delivery_price: f64,
    pub total_price: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line requested by the customer, before it is priced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub menu_item_id: MenuItemId,
    pub quantity: u32,
}

/// A priced line ready to be persisted.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub menu_item_id: MenuItemId,
    pub quantity: u32,
    pub unit_price: f64,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: u64,
    pub restaurant_id: RestaurantId,
    pub lines: Vec<PricedLine>,
    pub items_price: f64,
}

#[cfg(test)]
mod tests {
    use super::OrderStatus;

    #[test]
    fn statuses_use_lowercase_names() {
        for status in [
            OrderStatus::Created,
            OrderStatus::Delivering,
            OrderStatus::Cancelled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!(serde_json::from_str::<OrderStatus>("\"delivered\"").is_err());
    }
}
