//! Wire payloads exchanged over the event bus.
//!
//! Both payloads are flat JSON objects discriminated by `event_name`; field
//! names are part of the contract with other deployments and must not change.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::courier::CourierId;
use crate::models::order::{OrderId, RestaurantId};

pub const ORDER_CREATED: &str = "order_created";
pub const ASSIGN_SHIPPER: &str = "assign_shipper";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub restaurant_id: RestaurantId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub order_id: OrderId,
    #[serde(rename = "shipper_id")]
    pub courier_id: CourierId,
    #[serde(rename = "distance")]
    pub distance_km: f64,
}

impl AssignmentResult {
    pub fn no_match(order_id: OrderId) -> Self {
        Self {
            order_id,
            courier_id: 0,
            distance_km: 0.0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.courier_id != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_name")]
pub enum Event {
    #[serde(rename = "order_created")]
    OrderCreated(OrderCreated),
    #[serde(rename = "assign_shipper")]
    AssignShipper(AssignmentResult),
}

/// Outcome of decoding a record: consumers skip events addressed to
/// somebody else instead of treating them as malformed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(Event),
    Ignored(String),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated(_) => ORDER_CREATED,
            Event::AssignShipper(_) => ASSIGN_SHIPPER,
        }
    }

    pub fn encode(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|err| AppError::Internal(format!("failed to encode {}: {err}", self.name())))
    }

    pub fn decode(payload: &str) -> Result<Decoded, AppError> {
        #[derive(Deserialize)]
        struct Envelope {
            event_name: String,
        }

        let envelope: Envelope = serde_json::from_str(payload)
            .map_err(|err| AppError::Validation(format!("malformed event: {err}")))?;

        match envelope.event_name.as_str() {
            ORDER_CREATED | ASSIGN_SHIPPER => serde_json::from_str(payload)
                .map(Decoded::Event)
                .map_err(|err| {
                    AppError::Validation(format!(
                        "malformed {} event: {err}",
                        envelope.event_name
                    ))
                }),
            _ => Ok(Decoded::Ignored(envelope.event_name)),
        }
    }
}
