use std::ops::DerefMut;
use std::str::FromStr;

use actix_request_identifier::RequestId;
use actix_web::{get, post, put, web, HttpResponse};
use bigdecimal::{BigDecimal, Signed};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::{error, instrument};

use crate::availability::{available_slots, date_is_blocked, ConflictScope};
use crate::config::ScheduleConfig;
use crate::database::connect::DbPool;
use crate::database::models::{
    Booking, BookingStatus, NewBooking, PaymentMethod, Transaction, TransactionStatus,
};
use crate::database::{BookingStore, PgStore};
use crate::error::EngineError;
use crate::ledger;
use crate::responses;
use crate::webhook::event::PaymentEvent;
use crate::webhook::Reconciler;

fn conflict_scope(member_scoped: bool, team_member_id: Option<String>) -> ConflictScope {
    match (member_scoped, team_member_id) {
        (true, Some(member)) => ConflictScope::TeamMember(member),
        _ => ConflictScope::Business,
    }
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub team_member_id: Option<String>,
}

#[get("/slots/{owner_id}/{service_id}/{date}")]
#[instrument(skip(db, config), fields(request_id = request_id.as_str()))]
pub async fn slots_handler(
    db: web::Data<DbPool>,
    config: web::Data<ScheduleConfig>,
    request_id: RequestId,
    path: web::Path<(String, String, String)>,
    query: web::Query<SlotsQuery>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let (req_owner_id, req_service_id, req_date) = path.into_inner();
    let req_service_id = match req_service_id.parse::<i64>() {
        Ok(id) => id,
        Err(_) => return Ok(responses::bad_parameter_http_response("service_id")),
    };
    let date = match NaiveDate::parse_from_str(req_date.as_str(), "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => return Ok(responses::bad_parameter_http_response("date")),
    };

    let mut conn = db.get()?;
    let hours = config.hours.clone();
    let scope = conflict_scope(config.member_scoped, query.team_member_id.clone());

    let res = web::block(move || -> Result<Vec<NaiveTime>, EngineError> {
        let mut store = PgStore::new(conn.deref_mut());
        let service = store
            .find_service(req_service_id)?
            .ok_or_else(|| EngineError::not_found(format!("service {req_service_id}")))?;
        let existing: Vec<Booking> = store
            .bookings_for_date(req_owner_id.as_str(), date)?
            .into_iter()
            .filter(|b| scope.covers(b))
            .collect();
        let blocked = store.blocked_ranges(req_owner_id.as_str())?;
        Ok(available_slots(
            date,
            service.duration_minutes as i64,
            service.buffer_minutes as i64,
            &existing,
            &blocked,
            &hours,
        )
        .collect())
    })
    .await;

    match res {
        Ok(Ok(slots)) => Ok(responses::slots_http_response(date, slots)),
        Ok(Err(e)) => {
            error!("{e}");
            Ok(responses::engine_error_http_response(&e))
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BookingInput {
    pub owner_id: String,
    pub team_member_id: Option<String>,
    pub service_id: String,
    pub date: String,
    pub time: String,
    pub duration_minutes: Option<i32>,
    pub quantity: Option<i32>,
    pub client_name: String,
    pub client_firstname: Option<String>,
    pub client_email: String,
    pub client_phone: Option<String>,
    pub total_amount: String,
}

#[post("/booking")]
#[instrument(skip(db, config, input), fields(request_id = request_id.as_str()))]
pub async fn create_booking_handler(
    db: web::Data<DbPool>,
    config: web::Data<ScheduleConfig>,
    request_id: RequestId,
    input: web::Json<BookingInput>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let input = input.into_inner();

    if input.owner_id.is_empty() {
        return Ok(responses::bad_parameter_http_response("owner_id"));
    }
    if input.client_name.is_empty() {
        return Ok(responses::bad_parameter_http_response("client_name"));
    }
    if input.client_email.is_empty() {
        return Ok(responses::bad_parameter_http_response("client_email"));
    }
    let service_id = match input.service_id.parse::<i64>() {
        Ok(id) => id,
        Err(_) => return Ok(responses::bad_parameter_http_response("service_id")),
    };
    let date = match NaiveDate::parse_from_str(input.date.as_str(), "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => return Ok(responses::bad_parameter_http_response("date")),
    };
    let time = match parse_clock_time(input.time.as_str()) {
        Some(time) => time,
        None => return Ok(responses::bad_parameter_http_response("time")),
    };
    let total_amount = match BigDecimal::from_str(input.total_amount.as_str()) {
        Ok(value) if !value.is_negative() => value,
        _ => return Ok(responses::bad_parameter_http_response("total_amount")),
    };
    let quantity = input.quantity.unwrap_or(1);
    if quantity < 1 {
        return Ok(responses::bad_parameter_http_response("quantity"));
    }
    if matches!(input.duration_minutes, Some(d) if d < 1) {
        return Ok(responses::bad_parameter_http_response("duration_minutes"));
    }

    let mut conn = db.get()?;
    let scope = conflict_scope(config.member_scoped, input.team_member_id.clone());

    let res = web::block(move || -> Result<Booking, EngineError> {
        let mut store = PgStore::new(conn.deref_mut());
        let service = store
            .find_service(service_id)?
            .ok_or_else(|| EngineError::not_found(format!("service {service_id}")))?;
        let blocked = store.blocked_ranges(input.owner_id.as_str())?;
        if date_is_blocked(date, &blocked) {
            return Err(EngineError::validation("date is not bookable"));
        }

        let booking = Booking::create(
            NewBooking {
                owner_id: input.owner_id,
                team_member_id: input.team_member_id,
                service_id,
                date,
                time,
                duration_minutes: input.duration_minutes.unwrap_or(service.duration_minutes),
                quantity,
                client_name: input.client_name,
                client_firstname: input.client_firstname,
                client_email: input.client_email,
                client_phone: input.client_phone,
                total_amount,
            },
            chrono::Utc::now().naive_utc(),
        );

        // authoritative re-check: the slot may have been taken since the
        // client queried availability
        store.insert_booking_checked(&booking, service.buffer_minutes as i64, &scope)?;
        Ok(booking)
    })
    .await;

    match res {
        Ok(Ok(booking)) => Ok(responses::booking_http_response(&booking)),
        Ok(Err(e)) => {
            error!("{e}");
            Ok(responses::engine_error_http_response(&e))
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ManualTransactionInput {
    pub amount: String,
    pub method: String,
    pub status: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BookingUpdateInput {
    pub team_member_id: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub duration_minutes: Option<i32>,
    pub quantity: Option<i32>,
    pub client_name: Option<String>,
    pub client_firstname: Option<String>,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub total_amount: Option<String>,
    pub cancel: Option<bool>,
    pub transaction: Option<ManualTransactionInput>,
}

#[put("/booking/{id}")]
#[instrument(skip(db, config, input), fields(request_id = request_id.as_str()))]
pub async fn update_booking_handler(
    db: web::Data<DbPool>,
    config: web::Data<ScheduleConfig>,
    request_id: RequestId,
    path: web::Path<String>,
    input: web::Json<BookingUpdateInput>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let booking_id = match path.into_inner().parse::<i64>() {
        Ok(id) => id,
        Err(_) => return Ok(responses::bad_parameter_http_response("id")),
    };
    let input = input.into_inner();

    let new_date = match &input.date {
        Some(raw) => match NaiveDate::parse_from_str(raw.as_str(), "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => return Ok(responses::bad_parameter_http_response("date")),
        },
        None => None,
    };
    let new_time = match &input.time {
        Some(raw) => match parse_clock_time(raw.as_str()) {
            Some(time) => Some(time),
            None => return Ok(responses::bad_parameter_http_response("time")),
        },
        None => None,
    };
    if matches!(input.duration_minutes, Some(d) if d < 1) {
        return Ok(responses::bad_parameter_http_response("duration_minutes"));
    }
    if matches!(input.quantity, Some(q) if q < 1) {
        return Ok(responses::bad_parameter_http_response("quantity"));
    }
    let new_total = match &input.total_amount {
        Some(raw) => match BigDecimal::from_str(raw.as_str()) {
            Ok(value) if !value.is_negative() => Some(value),
            _ => return Ok(responses::bad_parameter_http_response("total_amount")),
        },
        None => None,
    };
    // staff-recorded cash/transfer entries flow through the same ledger
    // as gateway captures
    let manual_tx = match &input.transaction {
        Some(tx) => {
            let amount = match BigDecimal::from_str(tx.amount.as_str()) {
                Ok(value) if value.is_positive() => value,
                _ => return Ok(responses::bad_parameter_http_response("transaction.amount")),
            };
            let method = match PaymentMethod::parse(tx.method.as_str()) {
                Ok(method) => method,
                Err(_) => return Ok(responses::bad_parameter_http_response("transaction.method")),
            };
            let status = match tx.status.as_deref() {
                Some(raw) => match TransactionStatus::parse(raw) {
                    Ok(status) => status,
                    Err(_) => return Ok(responses::bad_parameter_http_response("transaction.status")),
                },
                None => TransactionStatus::Completed,
            };
            Some((amount, method, status, tx.note.clone()))
        }
        None => None,
    };

    let mut conn = db.get()?;
    let member_scoped = config.member_scoped;

    let res = web::block(move || -> Result<Booking, EngineError> {
        let mut store = PgStore::new(conn.deref_mut());
        let mut booking = store
            .find_booking(booking_id)?
            .ok_or_else(|| EngineError::not_found(format!("booking {booking_id}")))?;

        let mut reschedule = false;
        if let Some(date) = new_date {
            reschedule |= date != booking.date;
            booking.date = date;
        }
        if let Some(time) = new_time {
            reschedule |= time != booking.time;
            booking.time = time;
        }
        if let Some(duration) = input.duration_minutes {
            reschedule |= duration != booking.duration_minutes;
            booking.duration_minutes = duration;
        }
        if let Some(member) = input.team_member_id {
            reschedule |= booking.team_member_id.as_deref() != Some(member.as_str());
            booking.team_member_id = Some(member);
        }
        if let Some(quantity) = input.quantity {
            booking.quantity = quantity;
        }
        if let Some(name) = input.client_name {
            booking.client_name = name;
        }
        if let Some(firstname) = input.client_firstname {
            booking.client_firstname = Some(firstname);
        }
        if let Some(email) = input.client_email {
            booking.client_email = email;
        }
        if let Some(phone) = input.client_phone {
            booking.client_phone = Some(phone);
        }
        if let Some(total) = new_total {
            booking.total_amount = total;
        }

        if let Some((amount, method, status, note)) = manual_tx {
            let transaction = Transaction::new(amount, method, status, note, chrono::Utc::now().naive_utc());
            let applied = ledger::apply_transaction(booking, transaction);
            booking = applied.booking;
            if applied.should_confirm && booking.booking_status == BookingStatus::Pending {
                booking.booking_status = BookingStatus::Confirmed;
            }
        }
        if input.cancel == Some(true) {
            booking.booking_status = BookingStatus::Cancelled;
        }

        let buffer_minutes = store
            .find_service(booking.service_id)?
            .map(|s| s.buffer_minutes as i64)
            .unwrap_or(0);
        let scope = conflict_scope(member_scoped, booking.team_member_id.clone());

        if reschedule && booking.booking_status != BookingStatus::Cancelled {
            store.update_booking_checked(&booking, buffer_minutes, &scope)?;
        } else {
            store.update_booking(&booking)?;
        }
        Ok(booking)
    })
    .await;

    match res {
        Ok(Ok(booking)) => Ok(responses::booking_http_response(&booking)),
        Ok(Err(e)) => {
            error!("{e}");
            Ok(responses::engine_error_http_response(&e))
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}

#[get("/booking/{id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn get_booking_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    path: web::Path<String>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let booking_id = match path.into_inner().parse::<i64>() {
        Ok(id) => id,
        Err(_) => return Ok(responses::bad_parameter_http_response("id")),
    };

    let mut conn = db.get()?;
    let res = web::block(move || {
        let mut store = PgStore::new(conn.deref_mut());
        store.find_booking(booking_id)
    })
    .await;

    match res {
        Ok(Ok(Some(booking))) => Ok(responses::booking_http_response(&booking)),
        Ok(Ok(None)) => Ok(responses::engine_error_http_response(&EngineError::not_found(
            format!("booking {booking_id}"),
        ))),
        Ok(Err(e)) => {
            error!("{e}");
            Ok(responses::engine_error_http_response(&e))
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}

#[post("/webhook/payment")]
#[instrument(skip(db, reconciler, event), fields(request_id = request_id.as_str()))]
pub async fn webhook_handler(
    db: web::Data<DbPool>,
    reconciler: web::Data<Reconciler>,
    request_id: RequestId,
    event: web::Json<PaymentEvent>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let event = event.into_inner();
    if event.session_id.is_empty() {
        return Ok(responses::bad_parameter_http_response("session_id"));
    }

    let mut conn = db.get()?;
    let reconciler = reconciler.get_ref().clone();
    let res = web::block(move || {
        let mut store = PgStore::new(conn.deref_mut());
        reconciler.handle_payment_event(&mut store, &event)
    })
    .await;

    match res {
        Ok(Ok(handled)) => Ok(responses::webhook_http_response(&handled)),
        Ok(Err(e)) => {
            error!("{e}");
            Ok(responses::engine_error_http_response(&e))
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}

fn parse_clock_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_scope_selection() {
        assert_eq!(
            conflict_scope(true, Some("tm_1".to_string())),
            ConflictScope::TeamMember("tm_1".to_string())
        );
        assert_eq!(conflict_scope(true, None), ConflictScope::Business);
        assert_eq!(conflict_scope(false, Some("tm_1".to_string())), ConflictScope::Business);
    }

    #[test]
    fn test_parse_clock_time_formats() {
        assert_eq!(parse_clock_time("09:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_clock_time("09:30:00"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_clock_time("9h30"), None);
    }
}
