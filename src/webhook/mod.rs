use std::str::FromStr;
use std::time::Duration;

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveTime};
use tracing::{info, warn};

use crate::database::models::{
    Booking, BookingStatus, NewBooking, PaymentMethod, Transaction, TransactionStatus,
};
use crate::database::BookingStore;
use crate::error::EngineError;
use crate::ledger;
use crate::webhook::dedup::{Begin, DedupCache};
use crate::webhook::event::PaymentEvent;

pub mod dedup;
pub mod event;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    // non-captured gateway status; documented no-op, not an error
    Ignored,
    // another delivery of the same session is still being processed
    InFlight,
    SubscriptionActivated { user_id: String },
    BookingCreated { booking_id: i64 },
    PaymentApplied { booking_id: i64, transaction_id: i64 },
}

#[derive(Debug, PartialEq)]
pub struct Handled {
    pub outcome: ReconcileOutcome,
    pub duplicate: bool,
}

// Orchestrates one inbound gateway event: filter, dedup, resolve to a
// booking (or create/classify), apply through the ledger, persist,
// record the outcome. All payment math lives in `ledger`; all storage
// behind `BookingStore`.
#[derive(Clone)]
pub struct Reconciler {
    dedup: DedupCache,
}

impl Reconciler {
    pub fn new(dedup_ttl: Duration) -> Reconciler {
        Reconciler {
            dedup: DedupCache::new(dedup_ttl),
        }
    }

    pub fn with_cache(dedup: DedupCache) -> Reconciler {
        Reconciler { dedup }
    }

    pub fn handle_payment_event(
        &self,
        store: &mut dyn BookingStore,
        event: &PaymentEvent,
    ) -> Result<Handled, EngineError> {
        if !event.is_captured() {
            info!(
                session_id = %event.session_id,
                status = %event.status,
                payment_status = %event.payment_status,
                "ignoring non-captured payment event"
            );
            return Ok(Handled {
                outcome: ReconcileOutcome::Ignored,
                duplicate: false,
            });
        }
        if event.session_id.is_empty() {
            return Err(EngineError::validation("event is missing session_id"));
        }

        // the placeholder lands before any datastore call; a second
        // delivery of the same session short-circuits here
        match self.dedup.begin(&event.session_id) {
            Begin::InFlight => Ok(Handled {
                outcome: ReconcileOutcome::InFlight,
                duplicate: true,
            }),
            Begin::Done(outcome) => Ok(Handled {
                outcome,
                duplicate: true,
            }),
            Begin::Fresh => match self.process(store, event) {
                Ok(outcome) => {
                    self.dedup.complete(&event.session_id, outcome.clone());
                    Ok(Handled {
                        outcome,
                        duplicate: false,
                    })
                }
                Err(e) => {
                    // let the gateway's retry reprocess this session
                    self.dedup.forget(&event.session_id);
                    Err(e)
                }
            },
        }
    }

    fn process(&self, store: &mut dyn BookingStore, event: &PaymentEvent) -> Result<ReconcileOutcome, EngineError> {
        if event.metadata.subscription_flag() {
            return self.activate_subscription(store, event);
        }
        if event.metadata.create_booking_flag() {
            return self.create_booking(store, event);
        }
        let booking = self.resolve_booking(store, event)?;
        self.apply_payment(store, booking, event)
    }

    fn activate_subscription(
        &self,
        store: &mut dyn BookingStore,
        event: &PaymentEvent,
    ) -> Result<ReconcileOutcome, EngineError> {
        let user_id = require(&event.metadata.user_id, "user_id")?;
        let plan_id = require(&event.metadata.plan_id, "plan_id")?;
        store.activate_subscription(user_id, plan_id)?;
        info!(session_id = %event.session_id, user_id, plan_id, "subscription activated");
        Ok(ReconcileOutcome::SubscriptionActivated {
            user_id: user_id.to_string(),
        })
    }

    // checkout sessions opened before the booking exists; the booking is
    // materialized from the session metadata once the money is captured.
    // user_id carries the owning account.
    fn create_booking(
        &self,
        store: &mut dyn BookingStore,
        event: &PaymentEvent,
    ) -> Result<ReconcileOutcome, EngineError> {
        let meta = &event.metadata;
        let owner_id = require(&meta.user_id, "user_id")?;
        let service_id = parse_i64(require(&meta.service_id, "service_id")?, "service_id")?;
        let date = parse_date(require(&meta.date, "date")?)?;
        let time = parse_time(require(&meta.time, "time")?)?;
        if event.customer_email.is_empty() {
            return Err(EngineError::validation("event is missing customer_email"));
        }

        let duration_minutes = match &meta.duration_minutes {
            Some(raw) => parse_i32(raw, "duration_minutes")?,
            None => store
                .find_service(service_id)?
                .ok_or_else(|| EngineError::not_found(format!("service {service_id}")))?
                .duration_minutes,
        };
        let quantity = match &meta.quantity {
            Some(raw) => parse_i32(raw, "quantity")?,
            None => 1,
        };
        let captured = event.captured_amount();
        let total_amount = match &meta.total_amount {
            Some(raw) => parse_amount(raw, "total_amount")?,
            None => captured.clone(),
        };

        let now = chrono::Utc::now().naive_utc();
        let booking = Booking::create(
            NewBooking {
                owner_id: owner_id.to_string(),
                team_member_id: None,
                service_id,
                date,
                time,
                duration_minutes,
                quantity,
                client_name: meta
                    .client_name
                    .clone()
                    .unwrap_or_else(|| event.customer_email.clone()),
                client_firstname: meta.client_firstname.clone(),
                client_email: event.customer_email.clone(),
                client_phone: meta.phone.clone(),
                total_amount,
            },
            now,
        );

        let seed = gateway_transaction(captured, &event.session_id, now);
        let applied = ledger::apply_transaction(booking, seed);
        let mut booking = applied.booking;
        booking.booking_status = BookingStatus::Confirmed;
        store.insert_booking(&booking)?;

        info!(
            session_id = %event.session_id,
            booking_id = booking.id,
            payment_status = booking.payment_status.as_str(),
            "booking created from captured payment"
        );
        Ok(ReconcileOutcome::BookingCreated {
            booking_id: booking.id,
        })
    }

    fn resolve_booking(&self, store: &mut dyn BookingStore, event: &PaymentEvent) -> Result<Booking, EngineError> {
        let meta = &event.metadata;
        if let Some(raw) = &meta.booking_id {
            let booking_id = parse_i64(raw, "booking_id")?;
            return store.find_booking(booking_id)?.ok_or_else(|| {
                EngineError::not_found(format!("no booking {booking_id} for captured payment"))
            });
        }

        // secondary strategy: match by contact and scheduled slot.
        // Captured money with no destination is an operator problem, so
        // a miss is an error, never a silent drop.
        let date = parse_date(require(&meta.date, "date")?)?;
        let time = parse_time(require(&meta.time, "time")?)?;
        if event.customer_email.is_empty() {
            return Err(EngineError::validation("event is missing customer_email"));
        }
        warn!(
            session_id = %event.session_id,
            customer_email = %event.customer_email,
            "no booking_id in metadata, falling back to contact match"
        );

        let mut matches = store.find_bookings_by_contact(&event.customer_email, date, time)?;
        if matches.is_empty() {
            return Err(EngineError::not_found(format!(
                "no booking matches captured payment for {} at {} {}",
                event.customer_email, date, time
            )));
        }
        if matches.len() > 1 {
            // the heuristic cannot tell two same-slot bookings of one
            // client apart; pick the oldest and leave a trace
            warn!(
                session_id = %event.session_id,
                customer_email = %event.customer_email,
                matches = matches.len(),
                "ambiguous contact match, applying payment to the oldest booking"
            );
        }
        Ok(matches.remove(0))
    }

    fn apply_payment(
        &self,
        store: &mut dyn BookingStore,
        booking: Booking,
        event: &PaymentEvent,
    ) -> Result<ReconcileOutcome, EngineError> {
        let now = chrono::Utc::now().naive_utc();
        let transaction = gateway_transaction(event.captured_amount(), &event.session_id, now);
        let transaction_id = transaction.id;

        let applied = ledger::apply_transaction(booking, transaction);
        let mut booking = applied.booking;
        // a captured payment confirms the booking even when it is only a
        // partial deposit
        booking.booking_status = BookingStatus::Confirmed;
        store.update_booking(&booking)?;

        info!(
            session_id = %event.session_id,
            booking_id = booking.id,
            transaction_id,
            payment_status = booking.payment_status.as_str(),
            "payment applied to booking"
        );
        Ok(ReconcileOutcome::PaymentApplied {
            booking_id: booking.id,
            transaction_id,
        })
    }
}

fn gateway_transaction(amount: BigDecimal, session_id: &str, now: chrono::NaiveDateTime) -> Transaction {
    Transaction::new(
        amount,
        PaymentMethod::ExternalGateway,
        TransactionStatus::Completed,
        Some(format!("gateway session {session_id}")),
        now,
    )
}

fn require<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, EngineError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EngineError::validation(format!("event metadata is missing {field}")))
}

fn parse_i64(raw: &str, field: &str) -> Result<i64, EngineError> {
    raw.parse()
        .map_err(|_| EngineError::validation(format!("metadata {field} '{raw}' is not a valid id")))
}

fn parse_i32(raw: &str, field: &str) -> Result<i32, EngineError> {
    raw.parse()
        .map_err(|_| EngineError::validation(format!("metadata {field} '{raw}' is not a number")))
}

fn parse_amount(raw: &str, field: &str) -> Result<BigDecimal, EngineError> {
    BigDecimal::from_str(raw)
        .map_err(|_| EngineError::validation(format!("metadata {field} '{raw}' is not an amount")))
}

fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| EngineError::validation(format!("metadata date '{raw}' is not a date")))
}

fn parse_time(raw: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| EngineError::validation(format!("metadata time '{raw}' is not a time")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{booking_fixture, PaymentStatus};
    use crate::database::testing::MemoryStore;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn captured_event(session_id: &str) -> PaymentEvent {
        serde_json::from_value(serde_json::json!({
            "session_id": session_id,
            "status": "complete",
            "payment_status": "paid",
            "amount_total_minor_units": 3000,
            "customer_email": "jane@example.com",
        }))
        .unwrap()
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(Duration::from_secs(600))
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 10).unwrap()
    }

    fn time() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    #[test]
    fn test_non_captured_event_is_ignored() {
        let mut store = MemoryStore::new();
        let cache = DedupCache::new(Duration::from_secs(600));
        let rec = Reconciler::with_cache(cache.clone());

        let mut event = captured_event("sess_1");
        event.payment_status = "unpaid".to_string();
        let handled = rec.handle_payment_event(&mut store, &event).unwrap();
        assert_eq!(handled.outcome, ReconcileOutcome::Ignored);
        assert!(!handled.duplicate);
        // filtered events never enter the dedup cache
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_payment_applied_to_explicit_booking() {
        let mut store = MemoryStore::new();
        let booking = booking_fixture(date(), time(), 60);
        let booking_id = booking.id;
        store.bookings.insert(booking_id, booking);

        let mut event = captured_event("sess_1");
        event.metadata.booking_id = Some(booking_id.to_string());

        let handled = reconciler().handle_payment_event(&mut store, &event).unwrap();
        match handled.outcome {
            ReconcileOutcome::PaymentApplied { booking_id: applied_to, .. } => {
                assert_eq!(applied_to, booking_id)
            }
            other => panic!("expected PaymentApplied, got {other:?}"),
        }

        let stored = store.bookings.get(&booking_id).unwrap();
        assert_eq!(stored.payment_amount, BigDecimal::from(30));
        assert_eq!(stored.payment_status, PaymentStatus::Partial);
        // a partial deposit still confirms
        assert_eq!(stored.booking_status, BookingStatus::Confirmed);
        assert_eq!(stored.transactions.len(), 1);
        let tx = &stored.transactions[0];
        assert_eq!(tx.method, PaymentMethod::ExternalGateway);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.note.as_deref(), Some("gateway session sess_1"));
    }

    #[test]
    fn test_duplicate_delivery_applies_ledger_once() {
        let mut store = MemoryStore::new();
        let booking = booking_fixture(date(), time(), 60);
        let booking_id = booking.id;
        store.bookings.insert(booking_id, booking);

        let mut event = captured_event("sess_1");
        event.metadata.booking_id = Some(booking_id.to_string());

        let rec = reconciler();
        let first = rec.handle_payment_event(&mut store, &event).unwrap();
        let second = rec.handle_payment_event(&mut store, &event).unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(store.bookings.get(&booking_id).unwrap().transactions.len(), 1);
    }

    #[test]
    fn test_concurrent_deliveries_apply_ledger_once() {
        let booking = booking_fixture(date(), time(), 60);
        let booking_id = booking.id;
        let mut seeded = MemoryStore::new();
        seeded.bookings.insert(booking_id, booking);
        let store = Arc::new(Mutex::new(seeded));

        let mut event = captured_event("sess_1");
        event.metadata.booking_id = Some(booking_id.to_string());

        let rec = reconciler();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rec = rec.clone();
                let store = store.clone();
                let event = event.clone();
                thread::spawn(move || {
                    let mut guard = store.lock().unwrap();
                    rec.handle_payment_event(&mut *guard, &event).unwrap()
                })
            })
            .collect();

        let results: Vec<Handled> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|h| !h.duplicate).count(), 1);
        let guard = store.lock().unwrap();
        assert_eq!(guard.bookings.get(&booking_id).unwrap().transactions.len(), 1);
    }

    #[test]
    fn test_create_booking_after_payment() {
        let mut store = MemoryStore::new();
        let mut event = captured_event("sess_1");
        event.metadata.create_booking_after_payment = Some("true".to_string());
        event.metadata.user_id = Some("acc_1".to_string());
        event.metadata.service_id = Some("42".to_string());
        event.metadata.date = Some("2026-08-10".to_string());
        event.metadata.time = Some("09:00".to_string());
        event.metadata.duration_minutes = Some("60".to_string());
        event.metadata.client_name = Some("Doe".to_string());
        event.metadata.total_amount = Some("100".to_string());

        let handled = reconciler().handle_payment_event(&mut store, &event).unwrap();
        let booking_id = match handled.outcome {
            ReconcileOutcome::BookingCreated { booking_id } => booking_id,
            other => panic!("expected BookingCreated, got {other:?}"),
        };

        assert_eq!(store.bookings.len(), 1);
        let booking = store.bookings.get(&booking_id).unwrap();
        // 3000 minor units against a total of 100: a deposit
        assert_eq!(booking.payment_amount, BigDecimal::from(30));
        assert_eq!(booking.payment_status, PaymentStatus::Partial);
        assert_eq!(booking.booking_status, BookingStatus::Confirmed);
        assert_eq!(booking.transactions.len(), 1);
        assert_eq!(booking.transactions[0].amount, BigDecimal::from(30));
        assert_eq!(booking.client_email, "jane@example.com");
    }

    #[test]
    fn test_create_booking_falls_back_to_service_duration() {
        use crate::database::models::Service;
        let mut store = MemoryStore::new().with_service(Service {
            id: 42,
            owner_id: "acc_1".to_string(),
            name: "Consultation".to_string(),
            duration_minutes: 45,
            buffer_minutes: 15,
            price: BigDecimal::from(100),
        });
        let mut event = captured_event("sess_1");
        event.metadata.create_booking_after_payment = Some("true".to_string());
        event.metadata.user_id = Some("acc_1".to_string());
        event.metadata.service_id = Some("42".to_string());
        event.metadata.date = Some("2026-08-10".to_string());
        event.metadata.time = Some("09:00".to_string());

        let handled = reconciler().handle_payment_event(&mut store, &event).unwrap();
        let booking_id = match handled.outcome {
            ReconcileOutcome::BookingCreated { booking_id } => booking_id,
            other => panic!("expected BookingCreated, got {other:?}"),
        };
        let booking = store.bookings.get(&booking_id).unwrap();
        assert_eq!(booking.duration_minutes, 45);
        // no metadata total: the captured amount is the total
        assert_eq!(booking.total_amount, BigDecimal::from(30));
        assert_eq!(booking.payment_status, PaymentStatus::Completed);
    }

    #[test]
    fn test_create_booking_missing_metadata_is_rejected() {
        let mut store = MemoryStore::new();
        let mut event = captured_event("sess_1");
        event.metadata.create_booking_after_payment = Some("true".to_string());
        event.metadata.user_id = Some("acc_1".to_string());
        // no service_id

        let err = reconciler().handle_payment_event(&mut store, &event).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(store.bookings.is_empty());
    }

    #[test]
    fn test_unknown_booking_id_is_terminal_and_retryable() {
        let mut store = MemoryStore::new();
        let mut event = captured_event("sess_1");
        event.metadata.booking_id = Some("999".to_string());

        let rec = reconciler();
        let err = rec.handle_payment_event(&mut store, &event).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        // the placeholder is gone: the retry processes again instead of
        // short-circuiting to a cached duplicate
        let err = rec.handle_payment_event(&mut store, &event).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_transient_store_failure_allows_retry() {
        let mut store = MemoryStore::new();
        let booking = booking_fixture(date(), time(), 60);
        let booking_id = booking.id;
        store.bookings.insert(booking_id, booking);
        store.fail_next_write = true;

        let mut event = captured_event("sess_1");
        event.metadata.booking_id = Some(booking_id.to_string());

        let rec = reconciler();
        let err = rec.handle_payment_event(&mut store, &event).unwrap_err();
        assert!(matches!(err, EngineError::Pool(_)));

        let handled = rec.handle_payment_event(&mut store, &event).unwrap();
        assert!(!handled.duplicate);
        assert_eq!(store.bookings.get(&booking_id).unwrap().transactions.len(), 1);
    }

    #[test]
    fn test_fallback_contact_resolution() {
        let mut store = MemoryStore::new();
        let booking = booking_fixture(date(), time(), 60);
        let booking_id = booking.id;
        store.bookings.insert(booking_id, booking);

        let mut event = captured_event("sess_1");
        event.metadata.date = Some("2026-08-10".to_string());
        event.metadata.time = Some("09:00".to_string());

        let handled = reconciler().handle_payment_event(&mut store, &event).unwrap();
        match handled.outcome {
            ReconcileOutcome::PaymentApplied { booking_id: applied_to, .. } => {
                assert_eq!(applied_to, booking_id)
            }
            other => panic!("expected PaymentApplied, got {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_contact_match_picks_oldest() {
        let mut store = MemoryStore::new();
        let mut older = booking_fixture(date(), time(), 60);
        older.created_at = older.created_at - chrono::Duration::hours(1);
        let older_id = older.id;
        let newer = booking_fixture(date(), time(), 60);
        store.bookings.insert(older.id, older);
        store.bookings.insert(newer.id, newer);

        let mut event = captured_event("sess_1");
        event.metadata.date = Some("2026-08-10".to_string());
        event.metadata.time = Some("09:00".to_string());

        let handled = reconciler().handle_payment_event(&mut store, &event).unwrap();
        match handled.outcome {
            ReconcileOutcome::PaymentApplied { booking_id, .. } => assert_eq!(booking_id, older_id),
            other => panic!("expected PaymentApplied, got {other:?}"),
        }
    }

    #[test]
    fn test_fallback_without_match_is_not_found() {
        let mut store = MemoryStore::new();
        let mut event = captured_event("sess_1");
        event.metadata.date = Some("2026-08-10".to_string());
        event.metadata.time = Some("09:00".to_string());

        let err = reconciler().handle_payment_event(&mut store, &event).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_subscription_metadata_activates_account() {
        let mut store = MemoryStore::new();
        let mut event = captured_event("sess_1");
        event.metadata.subscription = Some("true".to_string());
        event.metadata.user_id = Some("acc_1".to_string());
        event.metadata.plan_id = Some("plan_pro".to_string());

        let handled = reconciler().handle_payment_event(&mut store, &event).unwrap();
        assert_eq!(
            handled.outcome,
            ReconcileOutcome::SubscriptionActivated {
                user_id: "acc_1".to_string()
            }
        );
        assert_eq!(store.subscriptions.get("acc_1").map(String::as_str), Some("plan_pro"));
    }

    #[test]
    fn test_subscription_without_plan_is_rejected() {
        let mut store = MemoryStore::new();
        let mut event = captured_event("sess_1");
        event.metadata.subscription = Some("true".to_string());
        event.metadata.user_id = Some("acc_1".to_string());

        let err = reconciler().handle_payment_event(&mut store, &event).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(store.subscriptions.is_empty());
    }

    #[test]
    fn test_full_capture_completes_payment() {
        let mut store = MemoryStore::new();
        let mut booking = booking_fixture(date(), time(), 60);
        booking.total_amount = BigDecimal::from(30);
        let booking_id = booking.id;
        store.bookings.insert(booking_id, booking);

        let mut event = captured_event("sess_1");
        event.metadata.booking_id = Some(booking_id.to_string());

        reconciler().handle_payment_event(&mut store, &event).unwrap();
        let stored = store.bookings.get(&booking_id).unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Completed);
        assert_eq!(stored.booking_status, BookingStatus::Confirmed);
    }
}
