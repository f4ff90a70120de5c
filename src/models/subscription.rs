// models/subscription.rs
use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use mongodb::bson::{self, oid::ObjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }

    /// Next debit date after `date`. Monthly debits clamp to the end of short months.
    pub fn advance(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Frequency::Daily => date.checked_add_days(Days::new(1)),
            Frequency::Weekly => date.checked_add_days(Days::new(7)),
            Frequency::Monthly => date.checked_add_months(Months::new(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

/// A standing order ("Ratiba") debiting a customer on a fixed schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatibaSubscription {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub customer_id: Option<ObjectId>,
    pub customer_name: String,
    pub phone_number: String,
    pub amount: f64,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub next_payment_date: NaiveDate,
    pub status: SubscriptionStatus,
    pub account_reference: String,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl RatibaSubscription {
    pub fn is_due(&self, on: NaiveDate) -> bool {
        self.status == SubscriptionStatus::Active && self.next_payment_date <= on
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub id: Option<String>,
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub phone_number: String,
    pub amount: f64,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub next_payment_date: NaiveDate,
    pub status: SubscriptionStatus,
    pub account_reference: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RatibaSubscription> for SubscriptionResponse {
    fn from(sub: RatibaSubscription) -> Self {
        SubscriptionResponse {
            id: sub.id.map(|id| id.to_hex()),
            customer_id: sub.customer_id.map(|id| id.to_hex()),
            customer_name: sub.customer_name,
            phone_number: sub.phone_number,
            amount: sub.amount,
            frequency: sub.frequency,
            start_date: sub.start_date,
            next_payment_date: sub.next_payment_date,
            status: sub.status,
            account_reference: sub.account_reference,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn frequencies_advance_by_calendar_units() {
        assert_eq!(Frequency::Daily.advance(date(2026, 2, 28)), Some(date(2026, 3, 1)));
        assert_eq!(Frequency::Weekly.advance(date(2026, 12, 29)), Some(date(2027, 1, 5)));
        assert_eq!(Frequency::Monthly.advance(date(2026, 1, 31)), Some(date(2026, 2, 28)));
    }
}
