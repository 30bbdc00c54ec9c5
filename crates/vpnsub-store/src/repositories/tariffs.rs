use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::errors::StoreError;
use crate::models::Tariff;
use crate::util::parse_decimal;

pub struct TariffRepo<'a> {
    conn: &'a Connection,
}

impl<'a> TariffRepo<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        TariffRepo { conn }
    }

    pub fn by_id(&self, tariff_id: i64) -> Result<Option<Tariff>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, duration_days, price, is_active FROM tariffs WHERE id = ?1",
                params![tariff_id],
                row_to_tariff,
            )
            .optional()
            .map_err(StoreError::Database)?
            .transpose()
    }

    pub fn by_name(&self, name: &str) -> Result<Option<Tariff>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, duration_days, price, is_active FROM tariffs WHERE name = ?1",
                params![name],
                row_to_tariff,
            )
            .optional()
            .map_err(StoreError::Database)?
            .transpose()
    }

    pub fn active(&self) -> Result<Vec<Tariff>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, duration_days, price, is_active FROM tariffs WHERE is_active = 1")?;
        let rows = stmt.query_map([], row_to_tariff)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(StoreError::Database)??);
        }
        Ok(out)
    }

    pub fn create(&self, name: &str, duration_days: i64, price: Decimal) -> Result<Tariff, StoreError> {
        self.conn
            .execute(
                "INSERT INTO tariffs (name, duration_days, price, is_active) VALUES (?1, ?2, ?3, 1)",
                params![name, duration_days, price.to_string()],
            )
            .map_err(|e| StoreError::from_insert(e, "tariffs.name"))?;
        let id = self.conn.last_insert_rowid();
        Ok(Tariff { id, name: name.to_string(), duration_days, price, is_active: true })
    }
}

fn row_to_tariff(row: &rusqlite::Row) -> rusqlite::Result<Result<Tariff, StoreError>> {
    let price_raw: String = row.get(3)?;
    Ok((|| {
        Ok(Tariff {
            id: row.get(0)?,
            name: row.get(1)?,
            duration_days: row.get(2)?,
            price: parse_decimal(&price_raw)?,
            is_active: row.get::<_, i64>(4)? != 0,
        })
    })())
}
