#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use courier_match::engine::assignment::Collaborators;
use courier_match::external::memory::{
    InMemoryRestaurantDirectory, InMemoryRouter, RecordingNotifier, StaticGeocoder,
};
use courier_match::models::courier::{Coordinate, CourierId, CourierStatus};
use courier_match::models::order::{Order, OrderId, OrderStatus};
use courier_match::orders::repository::InMemoryOrderRepository;
use courier_match::state::{AppState, StateOptions};

pub const RESTAURANT_ID: u64 = 7;
pub const RESTAURANT_ADDRESS: &str = "12 Ly Tu Trong, District 1";
pub const BURGER: u64 = 1;
pub const FRIES: u64 = 2;
pub const SOLD_OUT: u64 = 3;

pub fn restaurant_location() -> Coordinate {
    Coordinate::new(106.70, 10.77)
}

/// A point `km` due north of the restaurant.
pub fn north_of_restaurant(km: f64) -> Coordinate {
    let origin = restaurant_location();
    Coordinate::new(origin.longitude, origin.latitude + km / 111.195)
}

pub struct Fixture {
    pub state: Arc<AppState>,
    pub restaurants: Arc<InMemoryRestaurantDirectory>,
    pub geocoder: Arc<StaticGeocoder>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn fixture() -> Fixture {
    fixture_with_router(InMemoryRouter::straight_line())
}

pub fn fixture_with_router(router: InMemoryRouter) -> Fixture {
    let restaurants = Arc::new(InMemoryRestaurantDirectory::new());
    restaurants.put_restaurant(RESTAURANT_ID, RESTAURANT_ADDRESS);
    restaurants.put_menu_item(RESTAURANT_ID, BURGER, 4.0, true);
    restaurants.put_menu_item(RESTAURANT_ID, FRIES, 2.0, true);
    restaurants.put_menu_item(RESTAURANT_ID, SOLD_OUT, 3.0, false);

    let geocoder = Arc::new(StaticGeocoder::new());
    geocoder.put(RESTAURANT_ADDRESS, restaurant_location());

    let notifier = Arc::new(RecordingNotifier::new());

    let collaborators = Collaborators {
        restaurants: restaurants.clone(),
        geocoder: geocoder.clone(),
        router: Arc::new(router),
        notifier: notifier.clone(),
    };

    let options = StateOptions {
        redelivery_backoff: Duration::from_millis(10),
        ..StateOptions::default()
    };
    let state = Arc::new(AppState::new(
        &options,
        Arc::new(InMemoryOrderRepository::new()),
        collaborators,
    ));

    Fixture {
        state,
        restaurants,
        geocoder,
        notifier,
    }
}

pub async fn available_courier(state: &AppState, courier_id: CourierId, at: Coordinate) {
    state.couriers.register(courier_id).await.unwrap();
    state
        .couriers
        .set_status(courier_id, CourierStatus::Available)
        .await
        .unwrap();
    state.couriers.set_location(courier_id, at).await.unwrap();
}

/// Polls until the order leaves `created`.
pub async fn wait_finalized(state: &AppState, order_id: OrderId) -> Order {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let order = state.orders.get_order(order_id).await.unwrap();
        if order.status != OrderStatus::Created {
            return order;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "order {order_id} was never finalized"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
