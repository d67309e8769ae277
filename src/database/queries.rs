use chrono::{NaiveDate, NaiveTime};
use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::models::{self, BlockedDateRange, Booking, BookingStatus, Service};
use crate::error::EngineError;

pub fn find_booking(conn: &mut PgConnection, req_booking_id: i64) -> Result<Option<Booking>, EngineError> {
    let row = {
        use crate::schema::booking::dsl::*;
        booking
            .filter(id.eq(req_booking_id))
            .first::<models::BookingRow>(conn)
            .optional()?
    };
    row.map(|r| r.into_booking()).transpose()
}

// fallback resolution for captured payments without an explicit booking
// id; cancelled bookings never match, oldest first so retries pick the
// same booking
pub fn find_bookings_by_contact(
    conn: &mut PgConnection,
    req_email: &str,
    req_date: NaiveDate,
    req_time: NaiveTime,
) -> Result<Vec<Booking>, EngineError> {
    let rows = {
        use crate::schema::booking::dsl::*;
        booking
            .filter(client_email.eq(req_email))
            .filter(date.eq(req_date))
            .filter(time.eq(req_time))
            .filter(booking_status.ne(BookingStatus::Cancelled.as_str()))
            .order(created_at.asc())
            .load::<models::BookingRow>(conn)?
    };
    rows.into_iter().map(|r| r.into_booking()).collect()
}

pub fn bookings_for_date(
    conn: &mut PgConnection,
    req_owner_id: &str,
    req_date: NaiveDate,
) -> Result<Vec<Booking>, EngineError> {
    let rows = {
        use crate::schema::booking::dsl::*;
        booking
            .filter(owner_id.eq(req_owner_id))
            .filter(date.eq(req_date))
            .filter(booking_status.ne(BookingStatus::Cancelled.as_str()))
            .order(time.asc())
            .load::<models::BookingRow>(conn)?
    };
    rows.into_iter().map(|r| r.into_booking()).collect()
}

pub fn blocked_ranges(conn: &mut PgConnection, req_owner_id: &str) -> Result<Vec<BlockedDateRange>, EngineError> {
    use crate::schema::blocked_date_range::dsl::*;
    Ok(blocked_date_range
        .filter(owner_id.eq(req_owner_id))
        .order(start_date.asc())
        .load::<BlockedDateRange>(conn)?)
}

pub fn find_service(conn: &mut PgConnection, req_service_id: i64) -> Result<Option<Service>, EngineError> {
    use crate::schema::service::dsl::*;
    Ok(service
        .filter(id.eq(req_service_id))
        .first::<Service>(conn)
        .optional()?)
}
