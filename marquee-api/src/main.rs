use anyhow::Context;
use marquee_api::{app, metrics::Metrics, worker, AppState};
use marquee_reservation::{ReservationCoordinator, ReservationPolicy};
use marquee_store::{app_config::Config, DbClient, EventProducer, KafkaReservationEvents, PgReservationRepository, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marquee_api=debug,marquee_reservation=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Marquee API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    // Redis
    let redis = RedisClient::new(&config.redis.url, &config.reservations.lock_prefix)
        .await
        .context("Failed to connect to Redis")?;

    // Kafka
    let producer = EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;
    let events = KafkaReservationEvents::new(
        producer.clone(),
        &config.kafka.reservations_topic,
        &config.kafka.delay_topic,
    );

    let coordinator = Arc::new(ReservationCoordinator::new(
        Arc::new(PgReservationRepository::new(db.pool.clone())),
        Arc::new(redis),
        Arc::new(events),
        ReservationPolicy::from_seconds(config.reservations.hold_seconds),
    ));
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();

    {
        let kafka = config.kafka.clone();
        let coordinator = coordinator.clone();
        let metrics = metrics.clone();
        let shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            if let Err(e) = worker::start_reservation_worker(kafka, coordinator, metrics, shutdown).await {
                tracing::error!("Reservation worker failed: {}", e);
            }
        }));
    }

    {
        let kafka = config.kafka.clone();
        let producer = producer.clone();
        let shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            if let Err(e) = worker::start_delay_relay(kafka, producer, shutdown).await {
                tracing::error!("Delay relay failed: {}", e);
            }
        }));
    }

    if config.reservations.sweep_interval_seconds > 0 {
        workers.push(tokio::spawn(worker::start_expiry_sweeper(
            config.reservations.clone(),
            coordinator.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
        )));
    } else {
        tracing::info!("Overdue sweep disabled");
    }

    let app = app(AppState { coordinator, metrics });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.context("Failed to bind listener")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("HTTP server stopped, draining workers");
    let _ = shutdown_tx.send(true);
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!("Worker task panicked: {}", e);
        }
    }

    if let Err(e) = producer.flush(Duration::from_secs(5)) {
        tracing::warn!("Kafka flush incomplete: {}", e);
    }
    db.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
