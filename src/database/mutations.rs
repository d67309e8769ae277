use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use diesel::sql_types::BigInt;
use diesel::{Connection, ExpressionMethods, PgConnection, QueryDsl, RunQueryDsl};

use crate::availability::{has_conflict, ConflictScope, Interval};
use crate::database::models::{Booking, NewBookingRow};
use crate::database::queries;
use crate::error::EngineError;

// Serializes every check-and-insert touching one (owner, date) pair.
// A row lock cannot guard against concurrent inserts (there is no row
// yet), so the conflict check runs under an advisory lock instead.
fn lock_owner_date(conn: &mut PgConnection, req_owner_id: &str, req_date: NaiveDate) -> Result<(), EngineError> {
    let mut hasher = DefaultHasher::new();
    req_owner_id.hash(&mut hasher);
    req_date.hash(&mut hasher);
    let key = hasher.finish() as i64;
    diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
        .bind::<BigInt, _>(key)
        .execute(conn)?;
    Ok(())
}

pub fn insert_booking(conn: &mut PgConnection, req_booking: &Booking) -> Result<(), EngineError> {
    use crate::schema::booking::dsl::*;
    let row = NewBookingRow::from_booking(req_booking)?;
    diesel::insert_into(booking).values(&row).execute(conn)?;
    Ok(())
}

pub fn insert_booking_checked(
    conn: &mut PgConnection,
    req_booking: &Booking,
    req_buffer_minutes: i64,
    scope: &ConflictScope,
) -> Result<(), EngineError> {
    conn.transaction::<_, EngineError, _>(|conn| {
        lock_owner_date(conn, &req_booking.owner_id, req_booking.date)?;

        let existing = queries::bookings_for_date(conn, &req_booking.owner_id, req_booking.date)?;
        let proposed = Interval::starting_at(req_booking.time, req_booking.duration_minutes as i64);
        if has_conflict(proposed, scope, req_buffer_minutes, &existing) {
            return Err(EngineError::Conflict);
        }

        insert_booking(conn, req_booking)
    })
}

pub fn update_booking(conn: &mut PgConnection, req_booking: &Booking) -> Result<(), EngineError> {
    use crate::schema::booking::dsl::*;
    let mut row = NewBookingRow::from_booking(req_booking)?;
    row.updated_at = chrono::Utc::now().naive_utc();
    let updated = diesel::update(booking.filter(id.eq(req_booking.id)))
        .set(&row)
        .execute(conn)?;
    if updated == 0 {
        return Err(EngineError::not_found(format!("booking {}", req_booking.id)));
    }
    Ok(())
}

pub fn update_booking_checked(
    conn: &mut PgConnection,
    req_booking: &Booking,
    req_buffer_minutes: i64,
    scope: &ConflictScope,
) -> Result<(), EngineError> {
    conn.transaction::<_, EngineError, _>(|conn| {
        lock_owner_date(conn, &req_booking.owner_id, req_booking.date)?;

        let existing: Vec<Booking> = queries::bookings_for_date(conn, &req_booking.owner_id, req_booking.date)?
            .into_iter()
            .filter(|b| b.id != req_booking.id)
            .collect();
        let proposed = Interval::starting_at(req_booking.time, req_booking.duration_minutes as i64);
        if has_conflict(proposed, scope, req_buffer_minutes, &existing) {
            return Err(EngineError::Conflict);
        }

        update_booking(conn, req_booking)
    })
}

pub fn upsert_subscription(conn: &mut PgConnection, req_user_id: &str, req_plan_id: &str) -> Result<(), EngineError> {
    use crate::schema::account_subscription::dsl::*;
    let now = chrono::Utc::now().naive_utc();
    diesel::insert_into(account_subscription)
        .values((
            user_id.eq(req_user_id),
            plan_id.eq(req_plan_id),
            status.eq("active"),
            updated_at.eq(now),
        ))
        .on_conflict(user_id)
        .do_update()
        .set((plan_id.eq(req_plan_id), status.eq("active"), updated_at.eq(now)))
        .execute(conn)?;
    Ok(())
}
