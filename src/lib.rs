pub mod api;
pub mod bus;
pub mod config;
pub mod couriers;
pub mod engine;
pub mod error;
pub mod external;
pub mod geo;
pub mod models;
pub mod observability;
pub mod orders;
pub mod state;
