use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::errors::StoreError;
use crate::models::{Payment, PaymentStatus};
use crate::util::{parse_datetime, parse_decimal, to_rfc3339};

pub struct PaymentRepo<'a> {
    conn: &'a Connection,
}

impl<'a> PaymentRepo<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        PaymentRepo { conn }
    }

    pub fn create(
        &self,
        user_id: i64,
        tariff_id: i64,
        amount: Decimal,
        invoice_payload: &str,
    ) -> Result<Payment, StoreError> {
        let created_at = Utc::now();
        self.conn
            .execute(
                "INSERT INTO payments (user_id, tariff_id, amount, status, invoice_payload, created_at)
                 VALUES (?1, ?2, ?3, 'PENDING', ?4, ?5)",
                params![user_id, tariff_id, amount.to_string(), invoice_payload, to_rfc3339(&created_at)],
            )
            .map_err(|e| StoreError::from_insert(e, "payments.invoice_payload"))?;
        let id = self.conn.last_insert_rowid();
        Ok(Payment {
            id,
            user_id,
            tariff_id,
            amount,
            status: PaymentStatus::Pending,
            invoice_payload: invoice_payload.to_string(),
            external_charge_id: None,
            provider_charge_id: None,
            created_at,
            completed_at: None,
        })
    }

    pub fn by_id(&self, payment_id: i64) -> Result<Option<Payment>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, user_id, tariff_id, amount, status, invoice_payload,
                        external_charge_id, provider_charge_id, created_at, completed_at
                 FROM payments WHERE id = ?1",
                params![payment_id],
                row_to_payment,
            )
            .optional()
            .map_err(StoreError::Database)?
            .transpose()
    }

    pub fn update_status(
        &self,
        payment_id: i64,
        status: PaymentStatus,
        external_charge_id: Option<&str>,
        provider_charge_id: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE payments
                 SET status = ?1, external_charge_id = ?2, provider_charge_id = ?3, completed_at = ?4
                 WHERE id = ?5",
                params![
                    status.as_str(),
                    external_charge_id,
                    provider_charge_id,
                    to_rfc3339(&completed_at),
                    payment_id
                ],
            )
            .map_err(|e| StoreError::from_insert(e, "payments.external_charge_id"))?;
        Ok(())
    }
}

fn row_to_payment(row: &rusqlite::Row) -> rusqlite::Result<Result<Payment, StoreError>> {
    let amount_raw: String = row.get(3)?;
    let status_raw: String = row.get(4)?;
    let created_at_raw: String = row.get(8)?;
    let completed_at_raw: Option<String> = row.get(9)?;
    Ok((|| {
        Ok(Payment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            tariff_id: row.get(2)?,
            amount: parse_decimal(&amount_raw)?,
            status: PaymentStatus::parse(&status_raw),
            invoice_payload: row.get(5)?,
            external_charge_id: row.get(6)?,
            provider_charge_id: row.get(7)?,
            created_at: parse_datetime(&created_at_raw)?,
            completed_at: completed_at_raw.map(|s| parse_datetime(&s)).transpose()?,
        })
    })())
}
