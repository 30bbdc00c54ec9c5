use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::errors::StoreError;

pub fn to_rfc3339(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub fn parse_datetime(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::DateTimeParse(format!("{value}: {e}")))
}

pub fn parse_decimal(value: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(value).map_err(|e| StoreError::DecimalParse(format!("{value}: {e}")))
}
