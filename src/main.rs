use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_match::api;
use courier_match::config::{Config, LogFormat};
use courier_match::engine::assignment::Collaborators;
use courier_match::error::AppError;
use courier_match::external::http::{build_client, HttpCourierStatusNotifier, HttpRestaurantDirectory};
use courier_match::external::mapbox::MapboxClient;
use courier_match::orders::repository::InMemoryOrderRepository;
use courier_match::state::{AppState, StateOptions};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    if config.mapbox_token.is_empty() {
        warn!("MAPBOX_TOKEN is not set, geocoding and routing calls will be rejected");
    }

    let client = build_client(config.external_timeout)?;
    let mapbox = Arc::new(MapboxClient::new(
        config.mapbox_base_url.clone(),
        config.mapbox_token.clone(),
        client.clone(),
    ));
    let collaborators = Collaborators {
        restaurants: Arc::new(HttpRestaurantDirectory::new(
            config.restaurant_service_url.clone(),
            client.clone(),
        )),
        geocoder: mapbox.clone(),
        router: mapbox,
        notifier: Arc::new(HttpCourierStatusNotifier::new(
            config.courier_service_url.clone(),
            client,
        )),
    };

    let state = Arc::new(AppState::new(
        &StateOptions::from(&config),
        Arc::new(InMemoryOrderRepository::new()),
        collaborators,
    ));
    let consumers = state.spawn_consumers();
    info!(
        partitions = config.bus_partitions,
        consumers = consumers.len(),
        "event consumers started"
    );

    let app = api::rest::router(state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    state.bus.close();
    for consumer in consumers {
        if let Err(err) = consumer.await {
            warn!(error = %err, "consumer task ended abnormally");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
