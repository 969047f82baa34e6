use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::{
    CoreError, CoreResult, ExpireOutcome, Movie, NewTicket, ReservationRepository, ReserveOutcome, Seat, SeatForSale,
    Session, SessionListing, Ticket, TicketDetails,
};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::store(e)
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct SeatRow {
    id: Uuid,
    session_id: Uuid,
    seat_row: String,
    number: i32,
    status: String,
}

impl TryFrom<SeatRow> for Seat {
    type Error = CoreError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        Ok(Seat {
            id: row.id,
            session_id: row.session_id,
            row: row.seat_row,
            number: row.number,
            status: row.status.parse()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SeatForSaleRow {
    id: Uuid,
    session_id: Uuid,
    seat_row: String,
    number: i32,
    status: String,
    price_cents: i64,
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    seat_id: Uuid,
    user_id: Uuid,
    price_cents: i64,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = CoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            seat_id: row.seat_id,
            user_id: row.user_id,
            price_cents: row.price_cents,
            status: row.status.parse()?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketDetailsRow {
    id: Uuid,
    seat_id: Uuid,
    user_id: Uuid,
    price_cents: i64,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    session_id: Uuid,
    seat_row: String,
    number: i32,
    seat_status: String,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    movie_id: Uuid,
    starts_at: DateTime<Utc>,
    price_cents: i64,
    title: String,
    description: String,
    duration_minutes: i32,
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn find_seat(&self, seat_id: Uuid) -> CoreResult<Option<SeatForSale>> {
        let row = sqlx::query_as::<_, SeatForSaleRow>(
            r#"
            SELECT s.id, s.session_id, s.seat_row, s.number, s.status, se.price_cents
            FROM seats s
            JOIN sessions se ON se.id = s.session_id
            WHERE s.id = $1
            "#,
        )
        .bind(seat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(SeatForSale {
            seat: Seat {
                id: row.id,
                session_id: row.session_id,
                row: row.seat_row,
                number: row.number,
                status: row.status.parse()?,
            },
            price_cents: row.price_cents,
        }))
    }

    async fn reserve_seat(&self, ticket: &NewTicket) -> CoreResult<ReserveOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let locked = sqlx::query("UPDATE seats SET status = 'LOCKED' WHERE id = $1 AND status = 'AVAILABLE'")
            .bind(ticket.seat_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        if locked.rows_affected() == 0 {
            let current: Option<String> = sqlx::query_scalar("SELECT status FROM seats WHERE id = $1")
                .bind(ticket.seat_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.rollback().await.map_err(db_err)?;

            return match current {
                Some(status) => Ok(ReserveOutcome::SeatTaken(status.parse()?)),
                None => Ok(ReserveOutcome::SeatMissing),
            };
        }

        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            INSERT INTO tickets (id, seat_id, user_id, price_cents, status, expires_at)
            VALUES ($1, $2, $3, $4, 'PENDING', $5)
            RETURNING id, seat_id, user_id, price_cents, status, expires_at, created_at, updated_at
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.seat_id)
        .bind(ticket.user_id)
        .bind(ticket.price_cents)
        .bind(ticket.expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(ReserveOutcome::Reserved(row.try_into()?))
    }

    async fn pay_ticket(&self, ticket_id: Uuid) -> CoreResult<Option<Ticket>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            UPDATE tickets SET status = 'PAID', updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            RETURNING id, seat_id, user_id, price_cents, status, expires_at, created_at, updated_at
            "#,
        )
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(db_err)?;
            return Ok(None);
        };

        let sold = sqlx::query("UPDATE seats SET status = 'SOLD' WHERE id = $1 AND status = 'LOCKED'")
            .bind(row.seat_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        if sold.rows_affected() == 0 {
            warn!("Seat {} was not LOCKED while ticket {} was paid", row.seat_id, ticket_id);
        }

        tx.commit().await.map_err(db_err)?;

        Ok(Some(row.try_into()?))
    }

    async fn expire_ticket(&self, ticket_id: Uuid) -> CoreResult<ExpireOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let seat_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE tickets SET status = 'CANCELED', updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            RETURNING seat_id
            "#,
        )
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(seat_id) = seat_id else {
            tx.rollback().await.map_err(db_err)?;

            let status: Option<String> = sqlx::query_scalar("SELECT status FROM tickets WHERE id = $1")
                .bind(ticket_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

            return match status {
                Some(status) => Ok(ExpireOutcome::AlreadyResolved(status.parse()?)),
                None => Ok(ExpireOutcome::Missing),
            };
        };

        let released = sqlx::query("UPDATE seats SET status = 'AVAILABLE' WHERE id = $1 AND status = 'LOCKED'")
            .bind(seat_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        if released.rows_affected() == 0 {
            warn!("Seat {} was not LOCKED while ticket {} expired", seat_id, ticket_id);
        }

        tx.commit().await.map_err(db_err)?;

        Ok(ExpireOutcome::Expired { seat_id })
    }

    async fn find_ticket(&self, ticket_id: Uuid) -> CoreResult<Option<TicketDetails>> {
        let row = sqlx::query_as::<_, TicketDetailsRow>(
            r#"
            SELECT t.id, t.seat_id, t.user_id, t.price_cents, t.status, t.expires_at, t.created_at, t.updated_at,
                   s.session_id, s.seat_row, s.number, s.status AS seat_status
            FROM tickets t
            JOIN seats s ON s.id = t.seat_id
            WHERE t.id = $1
            "#,
        )
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let seat = Seat {
            id: row.seat_id,
            session_id: row.session_id,
            row: row.seat_row,
            number: row.number,
            status: row.seat_status.parse()?,
        };
        let ticket = Ticket {
            id: row.id,
            seat_id: row.seat_id,
            user_id: row.user_id,
            price_cents: row.price_cents,
            status: row.status.parse()?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };

        Ok(Some(TicketDetails { ticket, seat }))
    }

    async fn list_sessions(&self) -> CoreResult<Vec<SessionListing>> {
        let sessions = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT se.id, se.movie_id, se.starts_at, se.price_cents,
                   m.title, m.description, m.duration_minutes
            FROM sessions se
            JOIN movies m ON m.id = se.movie_id
            ORDER BY se.starts_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let session_ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();

        let seat_rows = sqlx::query_as::<_, SeatRow>(
            r#"
            SELECT id, session_id, seat_row, number, status
            FROM seats
            WHERE session_id = ANY($1)
            ORDER BY session_id, seat_row, number
            "#,
        )
        .bind(&session_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut seats_by_session: HashMap<Uuid, Vec<Seat>> = HashMap::new();
        for row in seat_rows {
            let seat = Seat::try_from(row)?;
            seats_by_session.entry(seat.session_id).or_default().push(seat);
        }

        Ok(sessions
            .into_iter()
            .map(|row| SessionListing {
                seats: seats_by_session.remove(&row.id).unwrap_or_default(),
                movie: Movie {
                    id: row.movie_id,
                    title: row.title,
                    description: row.description,
                    duration: row.duration_minutes,
                },
                session: Session {
                    id: row.id,
                    movie_id: row.movie_id,
                    starts_at: row.starts_at,
                    price_cents: row.price_cents,
                },
            })
            .collect())
    }

    async fn list_overdue_tickets(&self, cutoff: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT id, seat_id, user_id, price_cents, status, expires_at, created_at, updated_at
            FROM tickets
            WHERE status = 'PENDING' AND expires_at < $1
            ORDER BY expires_at
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Ticket::try_from).collect()
    }
}
