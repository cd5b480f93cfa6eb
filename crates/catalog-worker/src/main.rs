//! Video catalog worker entry point.

use std::sync::Arc;

use axum::Router;
use catalog_core::application_service::EventDispatcher;
use catalog_core::clock::{Clock, SystemClock};
use catalog_core::event_manager::DomainEventManager;
use catalog_messaging::amqp::AmqpBroker;
use catalog_messaging::message_bus::{MessageBus, TopologyMap};
use catalog_messaging::pg_queue::PgIntegrationEventQueue;
use catalog_messaging::queue::IntegrationEventQueue;
use catalog_messaging::retry::{RetryFilter, RetryPolicy};
use catalog_messaging::worker::IntegrationEventWorker;
use catalog_videos::application::event_handlers::register_video_handlers;
use catalog_worker::config::Config;
use catalog_worker::consumers::media_converted::{self, MediaConvertedConsumer};
use catalog_worker::error::AppError;
use catalog_worker::scope::PgVideoScopeFactory;
use catalog_worker::state::AppState;
use catalog_worker::{routes, telemetry};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;
    let tracer_provider = telemetry::init(config.otlp_endpoint.as_deref())?;

    info!("Starting video catalog worker");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue: Arc<dyn IntegrationEventQueue> = Arc::new(PgIntegrationEventQueue::new(pool.clone()));
    let broker = Arc::new(AmqpBroker::connect(&config.amqp_url).await?);
    broker.declare(&media_converted::TOPOLOGY).await?;

    let mut manager = DomainEventManager::new();
    register_video_handlers(&mut manager, queue.clone());
    let (dispatcher, dispatcher_task) = EventDispatcher::spawn(manager);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let relay = IntegrationEventWorker::new(
        queue.clone(),
        MessageBus::new(broker.clone(), TopologyMap::default()),
        config.worker.clone(),
    );
    let relay_task = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        let shutdown_tx = shutdown_tx.clone();
        async move {
            let result = relay.run(shutdown_rx).await;
            shutdown_tx.send_replace(true);
            result
        }
    });

    let consumer = MediaConvertedConsumer::new(
        broker.clone(),
        Arc::new(PgVideoScopeFactory::new(pool.clone())),
        dispatcher,
        clock,
        RetryFilter::new(broker.clone(), RetryPolicy::default()),
    );
    let consumer_task = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        let shutdown_tx = shutdown_tx.clone();
        async move {
            let result = consumer.run(shutdown_rx).await;
            shutdown_tx.send_replace(true);
            result
        }
    });

    let app = Router::new()
        .merge(routes::health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(queue));

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await?;
    shutdown_tx.send_replace(true);

    let relay_result = relay_task.await;
    let consumer_result = consumer_task.await;
    if let Err(e) = dispatcher_task.await {
        error!(error = %e, "event dispatcher task panicked");
    }

    if let Some(Err(e)) = tracer_provider.map(|provider| provider.shutdown()) {
        error!(error = %e, "failed to flush spans");
    }

    if let Err(e) = broker.close().await {
        error!(error = %e, "failed to close broker connection");
    }

    relay_result??;
    consumer_result??;
    info!("Video catalog worker stopped");
    Ok(())
}

async fn wait_for_shutdown(mut background_stopped: watch::Receiver<bool>) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("Shutdown requested");
        }
        _ = background_stopped.changed() => info!("Background task stopped, shutting down"),
    }
}
