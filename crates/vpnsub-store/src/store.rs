use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::errors::StoreError;
use crate::repositories::{JobRepo, PaymentRepo, ReferralRepo, SubscriptionRepo, TariffRepo, UserRepo};
use crate::schema::SCHEMA_SQL;

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Relational persistence for users, tariffs, subscriptions, referrals,
/// payments and scheduler jobs. Wraps a pooled SQLite connection the way
/// `shinkai_sqlite::SqliteManager` wraps its own r2d2 pool; unlike that
/// manager, writes here are never auto-committed — callers always go
/// through a `UnitOfWork`.
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    pub fn new(database_path: &str) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(database_path);
        let pool = Pool::builder().max_size(8).build(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(SCHEMA_SQL)?;
        }
        Ok(Store { pool })
    }

    /// In-memory database, used by tests and the `FakeVpnProvisioner`
    /// exercises in `vpnsub-core`.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::memory();
        // A single-connection pool: SQLite's `:memory:` database is
        // private per-connection, so pooling more than one handle here
        // would silently give callers separate empty databases.
        let pool = Pool::builder().max_size(1).build(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(SCHEMA_SQL)?;
        }
        Ok(Store { pool })
    }

    /// Open a unit of work: a single SQLite transaction shared by every
    /// repository accessed through the returned handle. The caller must
    /// call `commit()` explicitly; dropping without committing rolls back.
    pub fn begin(&self) -> Result<UnitOfWork, StoreError> {
        let conn = self.pool.get()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(UnitOfWork { conn: Some(conn), finished: false })
    }
}

pub struct UnitOfWork {
    conn: Option<PooledConnection>,
    finished: bool,
}

impl UnitOfWork {
    fn conn(&self) -> &rusqlite::Connection {
        self.conn.as_ref().expect("unit of work used after commit/rollback")
    }

    pub fn commit(mut self) -> Result<(), StoreError> {
        self.conn().execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), StoreError> {
        self.conn().execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }

    pub fn users(&self) -> UserRepo<'_> {
        UserRepo::new(self.conn())
    }

    pub fn tariffs(&self) -> TariffRepo<'_> {
        TariffRepo::new(self.conn())
    }

    pub fn subscriptions(&self) -> SubscriptionRepo<'_> {
        SubscriptionRepo::new(self.conn())
    }

    pub fn referrals(&self) -> ReferralRepo<'_> {
        ReferralRepo::new(self.conn())
    }

    pub fn payments(&self) -> PaymentRepo<'_> {
        PaymentRepo::new(self.conn())
    }

    pub fn jobs(&self) -> JobRepo<'_> {
        JobRepo::new(self.conn())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(conn) = &self.conn {
                if let Err(err) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!(error = %err, "failed to roll back abandoned unit of work");
                }
            }
        }
    }
}
