use bigdecimal::{BigDecimal, Zero};

use crate::database::models::{Booking, PaymentStatus, Transaction, TransactionStatus};

pub struct Applied {
    pub booking: Booking,
    // payment covers the total; whether the booking flips to confirmed
    // is the caller's call (webhook captures confirm unconditionally)
    pub should_confirm: bool,
}

pub fn completed_total(transactions: &[Transaction]) -> BigDecimal {
    transactions
        .iter()
        .filter(|t| t.status == TransactionStatus::Completed)
        .fold(BigDecimal::zero(), |acc, t| acc + t.amount.clone())
}

pub fn derive_payment_status(payment_amount: &BigDecimal, total_amount: &BigDecimal) -> PaymentStatus {
    if payment_amount.is_zero() {
        PaymentStatus::Pending
    } else if payment_amount >= total_amount {
        PaymentStatus::Completed
    } else {
        PaymentStatus::Partial
    }
}

// Appends the transaction and rederives the aggregate payment state.
// The ledger is append-only: failed and pending transactions stay on
// record, they just never count towards payment_amount. total_amount is
// never touched here.
pub fn apply_transaction(mut booking: Booking, transaction: Transaction) -> Applied {
    booking.transactions.push(transaction);
    booking.payment_amount = completed_total(&booking.transactions);
    booking.payment_status = derive_payment_status(&booking.payment_amount, &booking.total_amount);
    let should_confirm = booking.payment_amount >= booking.total_amount;
    Applied {
        booking,
        should_confirm,
    }
}
