use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::StoreError;
use crate::models::Referral;
use crate::util::{parse_datetime, to_rfc3339};

pub struct ReferralRepo<'a> {
    conn: &'a Connection,
}

impl<'a> ReferralRepo<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        ReferralRepo { conn }
    }

    pub fn create(&self, referrer_id: i64, referred_id: i64, bonus_days: i64) -> Result<Referral, StoreError> {
        let created_at = Utc::now();
        self.conn
            .execute(
                "INSERT INTO referrals (referrer_id, referred_id, bonus_days, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![referrer_id, referred_id, bonus_days, to_rfc3339(&created_at)],
            )
            .map_err(|e| StoreError::from_insert(e, "referrals.referred_id"))?;
        let id = self.conn.last_insert_rowid();
        Ok(Referral { id, referrer_id, referred_id, bonus_days, created_at })
    }

    pub fn by_referred_id(&self, referred_id: i64) -> Result<Option<Referral>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, referrer_id, referred_id, bonus_days, created_at
                 FROM referrals WHERE referred_id = ?1",
                params![referred_id],
                row_to_referral,
            )
            .optional()
            .map_err(StoreError::Database)?
            .transpose()
    }

    pub fn by_referrer_id(&self, referrer_id: i64) -> Result<Vec<Referral>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, referrer_id, referred_id, bonus_days, created_at
             FROM referrals WHERE referrer_id = ?1",
        )?;
        let rows = stmt.query_map(params![referrer_id], row_to_referral)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(StoreError::Database)??);
        }
        Ok(out)
    }
}

fn row_to_referral(row: &rusqlite::Row) -> rusqlite::Result<Result<Referral, StoreError>> {
    let created_at_raw: String = row.get(4)?;
    Ok((|| {
        Ok(Referral {
            id: row.get(0)?,
            referrer_id: row.get(1)?,
            referred_id: row.get(2)?,
            bonus_days: row.get(3)?,
            created_at: parse_datetime(&created_at_raw)?,
        })
    })())
}
