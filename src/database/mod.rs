use chrono::{NaiveDate, NaiveTime};
use diesel::PgConnection;

use crate::availability::ConflictScope;
use crate::database::models::{BlockedDateRange, Booking, Service};
use crate::error::EngineError;

pub mod connect;
pub mod idgen;
pub mod models;
pub mod mutations;
pub mod queries;
#[cfg(test)]
pub mod testing;

// The only seam touching the datastore. The reconciler and the route
// logic go through this trait so they can be exercised against the
// in-memory store in tests.
pub trait BookingStore {
    // unchecked insert; the webhook create-after-payment path uses this
    // because funds are already captured
    fn insert_booking(&mut self, booking: &Booking) -> Result<(), EngineError>;

    // serialized conflict check + insert, closing the race between slot
    // query and booking creation; a booking that appeared since the
    // availability check fails with EngineError::Conflict
    fn insert_booking_checked(
        &mut self,
        booking: &Booking,
        buffer_minutes: i64,
        scope: &ConflictScope,
    ) -> Result<(), EngineError>;

    fn update_booking(&mut self, booking: &Booking) -> Result<(), EngineError>;

    // re-checked update for reschedules; the booking itself is excluded
    // from the conflict comparison
    fn update_booking_checked(
        &mut self,
        booking: &Booking,
        buffer_minutes: i64,
        scope: &ConflictScope,
    ) -> Result<(), EngineError>;

    fn find_booking(&mut self, booking_id: i64) -> Result<Option<Booking>, EngineError>;

    // fallback payment resolution; excludes cancelled bookings, oldest first
    fn find_bookings_by_contact(
        &mut self,
        email: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Vec<Booking>, EngineError>;

    // excludes cancelled bookings
    fn bookings_for_date(&mut self, owner_id: &str, date: NaiveDate) -> Result<Vec<Booking>, EngineError>;

    fn blocked_ranges(&mut self, owner_id: &str) -> Result<Vec<BlockedDateRange>, EngineError>;

    fn find_service(&mut self, service_id: i64) -> Result<Option<Service>, EngineError>;

    // boundary to the account-management collaborator
    fn activate_subscription(&mut self, user_id: &str, plan_id: &str) -> Result<(), EngineError>;
}

pub struct PgStore<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> PgStore<'a> {
    pub fn new(conn: &'a mut PgConnection) -> PgStore<'a> {
        PgStore { conn }
    }
}

impl BookingStore for PgStore<'_> {
    fn insert_booking(&mut self, booking: &Booking) -> Result<(), EngineError> {
        mutations::insert_booking(self.conn, booking)
    }

    fn insert_booking_checked(
        &mut self,
        booking: &Booking,
        buffer_minutes: i64,
        scope: &ConflictScope,
    ) -> Result<(), EngineError> {
        mutations::insert_booking_checked(self.conn, booking, buffer_minutes, scope)
    }

    fn update_booking(&mut self, booking: &Booking) -> Result<(), EngineError> {
        mutations::update_booking(self.conn, booking)
    }

    fn update_booking_checked(
        &mut self,
        booking: &Booking,
        buffer_minutes: i64,
        scope: &ConflictScope,
    ) -> Result<(), EngineError> {
        mutations::update_booking_checked(self.conn, booking, buffer_minutes, scope)
    }

    fn find_booking(&mut self, booking_id: i64) -> Result<Option<Booking>, EngineError> {
        queries::find_booking(self.conn, booking_id)
    }

    fn find_bookings_by_contact(
        &mut self,
        email: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Vec<Booking>, EngineError> {
        queries::find_bookings_by_contact(self.conn, email, date, time)
    }

    fn bookings_for_date(&mut self, owner_id: &str, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        queries::bookings_for_date(self.conn, owner_id, date)
    }

    fn blocked_ranges(&mut self, owner_id: &str) -> Result<Vec<BlockedDateRange>, EngineError> {
        queries::blocked_ranges(self.conn, owner_id)
    }

    fn find_service(&mut self, service_id: i64) -> Result<Option<Service>, EngineError> {
        queries::find_service(self.conn, service_id)
    }

    fn activate_subscription(&mut self, user_id: &str, plan_id: &str) -> Result<(), EngineError> {
        mutations::upsert_subscription(self.conn, user_id, plan_id)
    }
}
