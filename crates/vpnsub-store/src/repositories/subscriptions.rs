use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::StoreError;
use crate::models::{Subscription, SubscriptionUpdate};
use crate::util::{parse_datetime, to_rfc3339};

pub struct SubscriptionRepo<'a> {
    conn: &'a Connection,
}

impl<'a> SubscriptionRepo<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        SubscriptionRepo { conn }
    }

    pub fn by_user_id(&self, user_id: i64) -> Result<Option<Subscription>, StoreError> {
        self.query_one("WHERE user_id = ?1", params![user_id])
    }

    pub fn by_id(&self, sub_id: i64) -> Result<Option<Subscription>, StoreError> {
        self.query_one("WHERE id = ?1", params![sub_id])
    }

    fn query_one(
        &self,
        predicate: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Subscription>, StoreError> {
        let sql = format!(
            "SELECT id, user_id, tariff_id, vpn_key, vpn_key_id, end_date, is_active,
                    cnt_payments, created_at, updated_at
             FROM subscriptions {predicate}"
        );
        self.conn
            .query_row(&sql, params, row_to_subscription)
            .optional()
            .map_err(StoreError::Database)?
            .transpose()
    }

    pub fn create(
        &self,
        user_id: i64,
        tariff_id: i64,
        vpn_key: &str,
        vpn_key_id: &str,
        end_date: chrono::DateTime<Utc>,
    ) -> Result<Subscription, StoreError> {
        let created_at = Utc::now();
        self.conn
            .execute(
                "INSERT INTO subscriptions
                    (user_id, tariff_id, vpn_key, vpn_key_id, end_date, is_active, cnt_payments, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6, NULL)",
                params![
                    user_id,
                    tariff_id,
                    vpn_key,
                    vpn_key_id,
                    to_rfc3339(&end_date),
                    to_rfc3339(&created_at)
                ],
            )
            .map_err(|e| StoreError::from_insert(e, "subscriptions.user_id"))?;
        let id = self.conn.last_insert_rowid();
        Ok(Subscription {
            id,
            user_id,
            tariff_id,
            vpn_key: vpn_key.to_string(),
            vpn_key_id: vpn_key_id.to_string(),
            end_date,
            is_active: true,
            cnt_payments: 0,
            created_at,
            updated_at: None,
        })
    }

    /// Partial update: only fields set in `update` are written. Always
    /// bumps `updated_at` and, when `cnt_payments_delta` is non-zero,
    /// increments the payment counter atomically in the same statement.
    pub fn update(
        &self,
        sub_id: i64,
        update: &SubscriptionUpdate,
        cnt_payments_delta: i64,
    ) -> Result<(), StoreError> {
        let now = to_rfc3339(&Utc::now());

        if let Some(vpn_key) = &update.vpn_key {
            self.conn
                .execute("UPDATE subscriptions SET vpn_key = ?1 WHERE id = ?2", params![vpn_key, sub_id])?;
        }
        if let Some(vpn_key_id) = &update.vpn_key_id {
            self.conn.execute(
                "UPDATE subscriptions SET vpn_key_id = ?1 WHERE id = ?2",
                params![vpn_key_id, sub_id],
            )?;
        }
        if let Some(end_date) = &update.end_date {
            self.conn.execute(
                "UPDATE subscriptions SET end_date = ?1 WHERE id = ?2",
                params![to_rfc3339(end_date), sub_id],
            )?;
        }
        if let Some(is_active) = update.is_active {
            self.conn.execute(
                "UPDATE subscriptions SET is_active = ?1 WHERE id = ?2",
                params![is_active as i64, sub_id],
            )?;
        }
        if cnt_payments_delta != 0 {
            self.conn.execute(
                "UPDATE subscriptions SET cnt_payments = cnt_payments + ?1 WHERE id = ?2",
                params![cnt_payments_delta, sub_id],
            )?;
        }
        self.conn
            .execute("UPDATE subscriptions SET updated_at = ?1 WHERE id = ?2", params![now, sub_id])?;
        Ok(())
    }
}

fn row_to_subscription(row: &rusqlite::Row) -> rusqlite::Result<Result<Subscription, StoreError>> {
    let end_date_raw: String = row.get(5)?;
    let created_at_raw: String = row.get(8)?;
    let updated_at_raw: Option<String> = row.get(9)?;
    Ok((|| {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            tariff_id: row.get(2)?,
            vpn_key: row.get(3)?,
            vpn_key_id: row.get(4)?,
            end_date: parse_datetime(&end_date_raw)?,
            is_active: row.get::<_, i64>(6)? != 0,
            cnt_payments: row.get(7)?,
            created_at: parse_datetime(&created_at_raw)?,
            updated_at: updated_at_raw.map(|s| parse_datetime(&s)).transpose()?,
        })
    })())
}
