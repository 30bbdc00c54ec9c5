use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub referral_code: String,
    pub trial_used: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tariff {
    pub id: i64,
    pub name: String,
    pub duration_days: i64,
    pub price: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub tariff_id: i64,
    pub vpn_key: String,
    pub vpn_key_id: String,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub cnt_payments: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Referral {
    pub id: i64,
    pub referrer_id: i64,
    pub referred_id: i64,
    pub bonus_days: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "SUCCESS" => PaymentStatus::Success,
            "FAILED" => PaymentStatus::Failed,
            "CANCELED" => PaymentStatus::Canceled,
            _ => PaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub tariff_id: i64,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub invoice_payload: String,
    pub external_charge_id: Option<String>,
    pub provider_charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update for a Subscription row. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub vpn_key: Option<String>,
    pub vpn_key_id: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub run_at: DateTime<Utc>,
    pub handler: String,
    pub args_json: String,
}

pub const HANDLER_DEACTIVATE: &str = "DEACTIVATE";
pub const HANDLER_NOTIFY: &str = "NOTIFY";

pub fn deactivate_job_id(sub_id: i64) -> String {
    format!("deactivate_{sub_id}")
}

pub fn notify_job_id(sub_id: i64) -> String {
    format!("notify_{sub_id}")
}
