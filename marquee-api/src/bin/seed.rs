use anyhow::Context;
use marquee_store::{app_config::Config, seed::seed_demo_showing, DbClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Wipes the reservation tables and loads one demo showing.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seed=info,marquee_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let session_id = seed_demo_showing(&db.pool).await.context("Seeding failed")?;
    tracing::info!("Seeded demo showing, session {}", session_id);

    db.close().await;
    Ok(())
}
