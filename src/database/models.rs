use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::database::idgen;
use crate::error::EngineError;

// Snowflake ids leave the 53-bit float-safe range, so they cross the
// JSON boundary as strings.
pub(crate) mod id_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Result<PaymentStatus, EngineError> {
        match raw {
            "pending" => Ok(PaymentStatus::Pending),
            "partial" => Ok(PaymentStatus::Partial),
            "completed" => Ok(PaymentStatus::Completed),
            _ => Err(EngineError::validation(format!("unknown payment status '{raw}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<BookingStatus, EngineError> {
        match raw {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            _ => Err(EngineError::validation(format!("unknown booking status '{raw}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "cash")]
    Cash,
    #[serde(rename = "card")]
    Card,
    #[serde(rename = "transfer")]
    Transfer,
    #[serde(rename = "external-gateway")]
    ExternalGateway,
}

impl PaymentMethod {
    pub fn parse(raw: &str) -> Result<PaymentMethod, EngineError> {
        match raw {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "transfer" => Ok(PaymentMethod::Transfer),
            "external-gateway" => Ok(PaymentMethod::ExternalGateway),
            _ => Err(EngineError::validation(format!("unknown payment method '{raw}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    Failed,
    Pending,
}

impl TransactionStatus {
    pub fn parse(raw: &str) -> Result<TransactionStatus, EngineError> {
        match raw {
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "pending" => Ok(TransactionStatus::Pending),
            _ => Err(EngineError::validation(format!("unknown transaction status '{raw}'"))),
        }
    }
}

// One payment movement. Immutable once appended to a booking's ledger;
// also the shape stored in the booking row's jsonb column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "id_string")]
    pub id: i64,
    pub amount: BigDecimal,
    pub method: PaymentMethod,
    pub status: TransactionStatus,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Transaction {
    pub fn new(
        amount: BigDecimal,
        method: PaymentMethod,
        status: TransactionStatus,
        note: Option<String>,
        created_at: NaiveDateTime,
    ) -> Transaction {
        Transaction {
            id: idgen::next(),
            amount,
            method,
            status,
            note,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Booking {
    #[serde(serialize_with = "id_string::serialize")]
    pub id: i64,
    pub owner_id: String,
    pub team_member_id: Option<String>,
    #[serde(serialize_with = "id_string::serialize")]
    pub service_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub quantity: i32,
    pub client_name: String,
    pub client_firstname: Option<String>,
    pub client_email: String,
    pub client_phone: Option<String>,
    pub total_amount: BigDecimal,
    pub payment_amount: BigDecimal,
    pub payment_status: PaymentStatus,
    pub booking_status: BookingStatus,
    pub transactions: Vec<Transaction>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// Booking input: everything the caller supplies; id, statuses, ledger
// and timestamps are derived.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub owner_id: String,
    pub team_member_id: Option<String>,
    pub service_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub quantity: i32,
    pub client_name: String,
    pub client_firstname: Option<String>,
    pub client_email: String,
    pub client_phone: Option<String>,
    pub total_amount: BigDecimal,
}

impl Booking {
    pub fn create(new: NewBooking, now: NaiveDateTime) -> Booking {
        Booking {
            id: idgen::next(),
            owner_id: new.owner_id,
            team_member_id: new.team_member_id,
            service_id: new.service_id,
            date: new.date,
            time: new.time,
            duration_minutes: new.duration_minutes,
            quantity: new.quantity,
            client_name: new.client_name,
            client_firstname: new.client_firstname,
            client_email: new.client_email,
            client_phone: new.client_phone,
            total_amount: new.total_amount,
            payment_amount: BigDecimal::from(0),
            payment_status: PaymentStatus::Pending,
            booking_status: BookingStatus::Pending,
            transactions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Serialize)]
pub struct BlockedDateRange {
    #[serde(serialize_with = "id_string::serialize")]
    pub id: i64,
    pub owner_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
}

// Read-only here; service definitions are maintained by the excluded
// CRUD surfaces.
#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct Service {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub duration_minutes: i32,
    pub buffer_minutes: i32,
    pub price: BigDecimal,
}

#[derive(Queryable)]
pub struct BookingRow {
    pub id: i64,
    pub owner_id: String,
    pub team_member_id: Option<String>,
    pub service_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub quantity: i32,
    pub client_name: String,
    pub client_firstname: Option<String>,
    pub client_email: String,
    pub client_phone: Option<String>,
    pub total_amount: BigDecimal,
    pub payment_amount: BigDecimal,
    pub payment_status: String,
    pub booking_status: String,
    pub transactions: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BookingRow {
    pub fn into_booking(self) -> Result<Booking, EngineError> {
        let transactions: Vec<Transaction> = serde_json::from_value(self.transactions)
            .map_err(|e| EngineError::validation(format!("corrupt transaction ledger: {e}")))?;
        Ok(Booking {
            id: self.id,
            owner_id: self.owner_id,
            team_member_id: self.team_member_id,
            service_id: self.service_id,
            date: self.date,
            time: self.time,
            duration_minutes: self.duration_minutes,
            quantity: self.quantity,
            client_name: self.client_name,
            client_firstname: self.client_firstname,
            client_email: self.client_email,
            client_phone: self.client_phone,
            total_amount: self.total_amount,
            payment_amount: self.payment_amount,
            payment_status: PaymentStatus::parse(&self.payment_status)?,
            booking_status: BookingStatus::parse(&self.booking_status)?,
            transactions,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::booking, treat_none_as_null = true)]
pub struct NewBookingRow {
    pub id: i64,
    pub owner_id: String,
    pub team_member_id: Option<String>,
    pub service_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub quantity: i32,
    pub client_name: String,
    pub client_firstname: Option<String>,
    pub client_email: String,
    pub client_phone: Option<String>,
    pub total_amount: BigDecimal,
    pub payment_amount: BigDecimal,
    pub payment_status: String,
    pub booking_status: String,
    pub transactions: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

pub fn ledger_to_json(transactions: &[Transaction]) -> Result<serde_json::Value, EngineError> {
    serde_json::to_value(transactions)
        .map_err(|e| EngineError::validation(format!("unserializable transaction ledger: {e}")))
}

impl NewBookingRow {
    pub fn from_booking(b: &Booking) -> Result<NewBookingRow, EngineError> {
        Ok(NewBookingRow {
            id: b.id,
            owner_id: b.owner_id.clone(),
            team_member_id: b.team_member_id.clone(),
            service_id: b.service_id,
            date: b.date,
            time: b.time,
            duration_minutes: b.duration_minutes,
            quantity: b.quantity,
            client_name: b.client_name.clone(),
            client_firstname: b.client_firstname.clone(),
            client_email: b.client_email.clone(),
            client_phone: b.client_phone.clone(),
            total_amount: b.total_amount.clone(),
            payment_amount: b.payment_amount.clone(),
            payment_status: b.payment_status.as_str().to_string(),
            booking_status: b.booking_status.as_str().to_string(),
            transactions: ledger_to_json(&b.transactions)?,
            created_at: b.created_at,
            updated_at: b.updated_at,
        })
    }
}

#[cfg(test)]
pub fn booking_fixture(date: NaiveDate, time: NaiveTime, duration_minutes: i32) -> Booking {
    let now = chrono::Utc::now().naive_utc();
    Booking::create(
        NewBooking {
            owner_id: "acc_1".to_string(),
            team_member_id: None,
            service_id: 1,
            date,
            time,
            duration_minutes,
            quantity: 1,
            client_name: "Doe".to_string(),
            client_firstname: Some("Jane".to_string()),
            client_email: "jane@example.com".to_string(),
            client_phone: None,
            total_amount: BigDecimal::from(100),
        },
        now,
    )
}
