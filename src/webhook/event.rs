use bigdecimal::BigDecimal;
use serde::Deserialize;

// Inbound payment-gateway notification. Metadata values arrive as
// strings regardless of their logical type; parsing happens in the
// reconciler where a bad value can be rejected with a useful message.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    pub session_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub payment_status: String,
    #[serde(default)]
    pub amount_total_minor_units: i64,
    #[serde(default)]
    pub customer_email: String,
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl PaymentEvent {
    // both flags must agree before an event counts as captured money;
    // expired or merely-created sessions also report "complete"-adjacent
    // states and must not be misread as paid
    pub fn is_captured(&self) -> bool {
        self.status == "complete" && self.payment_status == "paid"
    }

    pub fn captured_amount(&self) -> BigDecimal {
        BigDecimal::from(self.amount_total_minor_units) / BigDecimal::from(100)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventMetadata {
    pub booking_id: Option<String>,
    pub subscription: Option<String>,
    pub user_id: Option<String>,
    pub plan_id: Option<String>,
    pub create_booking_after_payment: Option<String>,
    pub service_id: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub duration_minutes: Option<String>,
    pub quantity: Option<String>,
    pub client_name: Option<String>,
    pub client_firstname: Option<String>,
    pub phone: Option<String>,
    pub total_amount: Option<String>,
}

impl EventMetadata {
    pub fn subscription_flag(&self) -> bool {
        self.subscription.as_deref() == Some("true")
    }

    pub fn create_booking_flag(&self) -> bool {
        self.create_booking_after_payment.as_deref() == Some("true")
    }
}
