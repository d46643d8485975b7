use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use lessonbook_core::{Direction, LedgerEntry};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::money::round2;

pub const PAYMENT_TYPES: [&str; 2] = ["payment", "credit"];

pub const REFUND_TYPES: [&str; 3] = ["refund", "package_refund", "booking_deleted_refund"];

pub const CHARGE_TYPES: [&str; 8] = [
    "package_purchase",
    "booking_charge",
    "charge",
    "debit",
    "service_payment",
    "rental_payment",
    "rental_charge",
    "booking_restore_adjustment",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerClass {
    Payment,
    Refund,
    Charge,
    Unclassified,
}

pub fn classify_transaction(transaction_type: &str) -> LedgerClass {
    let normalized = transaction_type.trim().to_ascii_lowercase();
    let normalized = normalized.as_str();
    if PAYMENT_TYPES.contains(&normalized) {
        LedgerClass::Payment
    } else if REFUND_TYPES.contains(&normalized) {
        LedgerClass::Refund
    } else if CHARGE_TYPES.contains(&normalized) {
        LedgerClass::Charge
    } else {
        LedgerClass::Unclassified
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionAggregates {
    pub payments: Decimal,
    pub refunds: Decimal,
    pub charges: Decimal,
    pub effective_refunds: Decimal,
    pub net_charges: Decimal,
    pub balance: Decimal,
    pub total_spent: Decimal,
    pub last_payment_at: Option<DateTime<Utc>>,
    /// Non-negative rows whose type is in none of the known sets. They do not
    /// move any total.
    pub unclassified_entries: usize,
}

/// Folds one account's ledger, in any order, into its balance and spend.
/// Totals saturate at `Decimal::MAX` instead of overflowing.
///
/// Refunds only count against money that was both paid and charged:
/// `effective_refunds = min(payments, refunds, charges)`, so a refund can never
/// leave the account holding more than was paid in, nor cancel more than was
/// charged.
pub fn compute_transaction_aggregates(entries: &[LedgerEntry]) -> TransactionAggregates {
    let mut payments = Decimal::ZERO;
    let mut refunds = Decimal::ZERO;
    let mut charges = Decimal::ZERO;
    let mut last_payment_at: Option<DateTime<Utc>> = None;
    let mut unclassified_entries = 0;

    for entry in entries {
        let amount = entry.signed_amount();
        if amount.is_zero() {
            continue;
        }

        let class = classify_transaction(&entry.transaction_type);
        match class {
            LedgerClass::Payment if amount > Decimal::ZERO => {
                payments = payments.saturating_add(amount);
                if let Some(at) = entry.occurred_at() {
                    last_payment_at = Some(last_payment_at.map_or(at, |seen| seen.max(at)));
                }
            }
            LedgerClass::Refund if amount > Decimal::ZERO => {
                refunds = refunds.saturating_add(amount);
            }
            _ if amount < Decimal::ZERO || class == LedgerClass::Charge => {
                charges = charges.saturating_add(amount.abs());
            }
            _ => unclassified_entries += 1,
        }
    }

    let effective_refunds = payments.min(refunds).min(charges);
    let net_charges = (charges - effective_refunds).max(Decimal::ZERO);

    TransactionAggregates {
        payments: round2(payments),
        refunds: round2(refunds),
        charges: round2(charges),
        effective_refunds: round2(effective_refunds),
        net_charges: round2(net_charges),
        balance: round2(payments - net_charges),
        total_spent: round2(net_charges),
        last_payment_at,
        unclassified_entries,
    }
}

/// Turns loosely typed ledger rows (exports, legacy JSON columns) into entries.
/// Never fails: amounts that are missing, non-numeric or non-finite become
/// absent, unreadable dates become absent, unreadable ids become nil.
pub fn normalize_raw_entry(row: &Value, customer_id: Uuid) -> LedgerEntry {
    let text = |names: &[&str]| -> Option<String> {
        names
            .iter()
            .find_map(|name| row.get(*name))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    let field = |names: &[&str]| names.iter().find_map(|name| row.get(*name));
    let id = |names: &[&str]| text(names).and_then(|raw| Uuid::parse_str(&raw).ok());
    let timestamp = |names: &[&str]| field(names).and_then(parse_timestamp_value);

    LedgerEntry {
        id: id(&["id"]).unwrap_or_else(Uuid::nil),
        customer_id,
        amount: field(&["amount"]).and_then(parse_amount),
        direction: text(&["direction"]).and_then(|raw| Direction::parse(&raw)),
        transaction_type: text(&["transactionType", "transaction_type", "type"])
            .unwrap_or_default(),
        currency: text(&["currency"]).unwrap_or_default(),
        status: text(&["status"]),
        description: text(&["description"]),
        booking_id: id(&["bookingId", "booking_id"]),
        rental_id: id(&["rentalId", "rental_id"]),
        transaction_date: timestamp(&["transactionDate", "transaction_date"]),
        created_at: timestamp(&["createdAt", "created_at"]),
    }
}

pub fn normalize_raw_entries(rows: &[Value], customer_id: Uuid) -> Vec<LedgerEntry> {
    rows.iter()
        .map(|row| normalize_raw_entry(row, customer_id))
        .collect()
}

fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => parse_decimal_text(&number.to_string()),
        Value::String(raw) => parse_decimal_text(raw),
        _ => None,
    }
}

fn parse_decimal_text(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .ok()
        .or_else(|| Decimal::from_scientific(raw).ok())
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .and_then(Decimal::from_f64)
        })
}

fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_timestamp(raw),
        Value::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Accepts RFC 3339, naive date-times (read as UTC) and bare dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
}
