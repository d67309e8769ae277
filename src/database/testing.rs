use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};

use crate::availability::{has_conflict, ConflictScope, Interval};
use crate::database::models::{BlockedDateRange, Booking, BookingStatus, Service};
use crate::database::BookingStore;
use crate::error::EngineError;

// In-memory stand-in for PgStore so the reconciler and route logic can
// be tested without a database. Mirrors the query semantics: cancelled
// bookings are invisible, contact matches come back oldest first.
#[derive(Default)]
pub struct MemoryStore {
    pub bookings: HashMap<i64, Booking>,
    pub blocked: Vec<BlockedDateRange>,
    pub services: HashMap<i64, Service>,
    pub subscriptions: HashMap<String, String>,
    // when set, the next write fails once with a transient error
    pub fail_next_write: bool,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn with_service(mut self, service: Service) -> MemoryStore {
        self.services.insert(service.id, service);
        self
    }

    fn check_injected_failure(&mut self) -> Result<(), EngineError> {
        if self.fail_next_write {
            self.fail_next_write = false;
            return Err(EngineError::Pool("injected transient failure".to_string()));
        }
        Ok(())
    }

    fn active_for_date(&self, owner: &str, date: NaiveDate) -> Vec<Booking> {
        let mut found: Vec<Booking> = self
            .bookings
            .values()
            .filter(|b| b.owner_id == owner && b.date == date)
            .filter(|b| b.booking_status != BookingStatus::Cancelled)
            .cloned()
            .collect();
        found.sort_by_key(|b| b.time);
        found
    }
}

impl BookingStore for MemoryStore {
    fn insert_booking(&mut self, booking: &Booking) -> Result<(), EngineError> {
        self.check_injected_failure()?;
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    fn insert_booking_checked(
        &mut self,
        booking: &Booking,
        buffer_minutes: i64,
        scope: &ConflictScope,
    ) -> Result<(), EngineError> {
        self.check_injected_failure()?;
        let existing = self.active_for_date(&booking.owner_id, booking.date);
        let proposed = Interval::starting_at(booking.time, booking.duration_minutes as i64);
        if has_conflict(proposed, scope, buffer_minutes, &existing) {
            return Err(EngineError::Conflict);
        }
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    fn update_booking(&mut self, booking: &Booking) -> Result<(), EngineError> {
        self.check_injected_failure()?;
        if !self.bookings.contains_key(&booking.id) {
            return Err(EngineError::not_found(format!("booking {}", booking.id)));
        }
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    fn update_booking_checked(
        &mut self,
        booking: &Booking,
        buffer_minutes: i64,
        scope: &ConflictScope,
    ) -> Result<(), EngineError> {
        self.check_injected_failure()?;
        let existing: Vec<Booking> = self
            .active_for_date(&booking.owner_id, booking.date)
            .into_iter()
            .filter(|b| b.id != booking.id)
            .collect();
        let proposed = Interval::starting_at(booking.time, booking.duration_minutes as i64);
        if has_conflict(proposed, scope, buffer_minutes, &existing) {
            return Err(EngineError::Conflict);
        }
        self.update_booking(booking)
    }

    fn find_booking(&mut self, booking_id: i64) -> Result<Option<Booking>, EngineError> {
        Ok(self.bookings.get(&booking_id).cloned())
    }

    fn find_bookings_by_contact(
        &mut self,
        email: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Vec<Booking>, EngineError> {
        let mut found: Vec<Booking> = self
            .bookings
            .values()
            .filter(|b| b.client_email == email && b.date == date && b.time == time)
            .filter(|b| b.booking_status != BookingStatus::Cancelled)
            .cloned()
            .collect();
        found.sort_by_key(|b| b.created_at);
        Ok(found)
    }

    fn bookings_for_date(&mut self, owner_id: &str, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        Ok(self.active_for_date(owner_id, date))
    }

    fn blocked_ranges(&mut self, owner_id: &str) -> Result<Vec<BlockedDateRange>, EngineError> {
        Ok(self
            .blocked
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn find_service(&mut self, service_id: i64) -> Result<Option<Service>, EngineError> {
        Ok(self.services.get(&service_id).cloned())
    }

    fn activate_subscription(&mut self, user_id: &str, plan_id: &str) -> Result<(), EngineError> {
        self.check_injected_failure()?;
        self.subscriptions.insert(user_id.to_string(), plan_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{booking_fixture, BookingStatus};
    use chrono::NaiveDate;

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 10).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_checked_insert_rejects_overlap() {
        let mut store = MemoryStore::new();
        let first = booking_fixture(d(), t(9, 0), 60);
        store.insert_booking_checked(&first, 0, &ConflictScope::Business).unwrap();

        let overlapping = booking_fixture(d(), t(9, 30), 60);
        let err = store
            .insert_booking_checked(&overlapping, 0, &ConflictScope::Business)
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict));
        assert_eq!(store.bookings.len(), 1);

        // back-to-back is allowed
        let adjacent = booking_fixture(d(), t(10, 0), 60);
        store.insert_booking_checked(&adjacent, 0, &ConflictScope::Business).unwrap();
        assert_eq!(store.bookings.len(), 2);
    }

    #[test]
    fn test_checked_update_excludes_the_booking_itself() {
        let mut store = MemoryStore::new();
        let mut booking = booking_fixture(d(), t(9, 0), 60);
        store.insert_booking(&booking).unwrap();

        // rescheduling within its own occupied window is not a conflict
        booking.time = t(9, 30);
        store
            .update_booking_checked(&booking, 0, &ConflictScope::Business)
            .unwrap();
        assert_eq!(store.bookings.get(&booking.id).unwrap().time, t(9, 30));
    }

    #[test]
    fn test_cancelled_bookings_are_invisible() {
        let mut store = MemoryStore::new();
        let mut cancelled = booking_fixture(d(), t(9, 0), 60);
        cancelled.booking_status = BookingStatus::Cancelled;
        store.insert_booking(&cancelled).unwrap();

        assert!(store.bookings_for_date("acc_1", d()).unwrap().is_empty());
        assert!(store
            .find_bookings_by_contact("jane@example.com", d(), t(9, 0))
            .unwrap()
            .is_empty());

        // a cancelled booking frees its slot
        let replacement = booking_fixture(d(), t(9, 0), 60);
        store
            .insert_booking_checked(&replacement, 0, &ConflictScope::Business)
            .unwrap();
    }
}
