use actix_web::HttpResponse;
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;

use crate::database::models::Booking;
use crate::error::EngineError;
use crate::webhook::{Handled, ReconcileOutcome};

pub fn bad_parameter_http_response(field: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({
        "success": false,
        "error": format!("bad parameter: {field}"),
    }))
}

pub fn booking_http_response(booking: &Booking) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "booking": booking,
    }))
}

pub fn slots_http_response(date: NaiveDate, slots: Vec<NaiveTime>) -> HttpResponse {
    let slots: Vec<String> = slots.iter().map(|s| s.format("%H:%M").to_string()).collect();
    HttpResponse::Ok().json(json!({
        "success": true,
        "date": date,
        "slots": slots,
    }))
}

pub fn conflict_http_response() -> HttpResponse {
    // user-actionable: pick another time, this is not a server failure
    HttpResponse::Conflict().json(json!({
        "success": false,
        "error": "slot no longer available",
    }))
}

pub fn webhook_http_response(handled: &Handled) -> HttpResponse {
    if handled.duplicate {
        return HttpResponse::Ok().json(json!({
            "success": true,
            "type": "cached_duplicate_prevented",
        }));
    }
    match &handled.outcome {
        ReconcileOutcome::Ignored => HttpResponse::Ok().json(json!({
            "success": true,
            "type": "ignored",
        })),
        ReconcileOutcome::InFlight => HttpResponse::Ok().json(json!({
            "success": true,
            "type": "cached_duplicate_prevented",
        })),
        ReconcileOutcome::SubscriptionActivated { user_id } => HttpResponse::Ok().json(json!({
            "success": true,
            "type": "subscription_activated",
            "user_id": user_id,
        })),
        ReconcileOutcome::BookingCreated { booking_id } => HttpResponse::Ok().json(json!({
            "success": true,
            "type": "booking_created",
            "booking_id": booking_id.to_string(),
        })),
        ReconcileOutcome::PaymentApplied {
            booking_id,
            transaction_id,
        } => HttpResponse::Ok().json(json!({
            "success": true,
            "type": "payment_applied",
            "booking_id": booking_id.to_string(),
            "transaction_id": transaction_id.to_string(),
        })),
    }
}

pub fn engine_error_http_response(e: &EngineError) -> HttpResponse {
    match e {
        EngineError::Validation(msg) => HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": msg,
        })),
        EngineError::NotFound(msg) => HttpResponse::NotFound().json(json!({
            "success": false,
            "error": msg,
        })),
        EngineError::Conflict => conflict_http_response(),
        // internals stay in the logs; the body carries a retryable hint
        EngineError::Datastore(_) | EngineError::Pool(_) => {
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": "internal error",
            }))
        }
    }
}
