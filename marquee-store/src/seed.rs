use chrono::{Days, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

pub const SEED_ROWS: [&str; 5] = ["A", "B", "C", "D", "E"];
pub const SEATS_PER_ROW: i32 = 10;

/// Wipe reservation data and load one showing with a full house of AVAILABLE seats.
/// Returns the session id.
pub async fn seed_demo_showing(pool: &PgPool) -> Result<Uuid, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM tickets").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM seats").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM sessions").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM movies").execute(&mut *tx).await?;
    info!("Reservation tables cleared");

    let movie_id = Uuid::new_v4();
    sqlx::query("INSERT INTO movies (id, title, description, duration_minutes) VALUES ($1, $2, $3, $4)")
        .bind(movie_id)
        .bind("The Concurrency Matrix")
        .bind("Developers fight race conditions.")
        .bind(120)
        .execute(&mut *tx)
        .await?;

    // Tomorrow at 20:00 UTC
    let starts_at = (Utc::now().date_naive() + Days::new(1))
        .and_hms_opt(20, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or_else(Utc::now);

    let session_id = Uuid::new_v4();
    sqlx::query("INSERT INTO sessions (id, movie_id, starts_at, price_cents) VALUES ($1, $2, $3, $4)")
        .bind(session_id)
        .bind(movie_id)
        .bind(starts_at)
        .bind(5000i64)
        .execute(&mut *tx)
        .await?;

    for row in SEED_ROWS {
        for number in 1..=SEATS_PER_ROW {
            sqlx::query("INSERT INTO seats (id, session_id, seat_row, number, status) VALUES ($1, $2, $3, $4, 'AVAILABLE')")
                .bind(Uuid::new_v4())
                .bind(session_id)
                .bind(row)
                .bind(number)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;
    info!(
        "Seeded session {} starting {} with {} seats",
        session_id,
        starts_at,
        SEED_ROWS.len() as i32 * SEATS_PER_ROW
    );

    Ok(session_id)
}
