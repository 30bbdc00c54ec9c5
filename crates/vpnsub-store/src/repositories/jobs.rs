use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::StoreError;
use crate::models::Job;
use crate::util::{parse_datetime, to_rfc3339};

pub struct JobRepo<'a> {
    conn: &'a Connection,
}

impl<'a> JobRepo<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        JobRepo { conn }
    }

    /// Insert a new job. Fails (as a `UniqueViolation`) if `job_id` already exists.
    pub fn add(&self, job_id: &str, run_at: DateTime<Utc>, handler: &str, args_json: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO scheduler_jobs (job_id, run_at, handler, args_json) VALUES (?1, ?2, ?3, ?4)",
                params![job_id, to_rfc3339(&run_at), handler, args_json],
            )
            .map_err(|e| StoreError::from_insert(e, "scheduler_jobs.job_id"))?;
        Ok(())
    }

    /// Remove-if-present, then insert. A no-op on the schedule beyond
    /// updating the target timestamp when called repeatedly for the same id.
    pub fn replace(&self, job_id: &str, run_at: DateTime<Utc>, handler: &str, args_json: &str) -> Result<(), StoreError> {
        self.remove(job_id)?;
        self.add(job_id, run_at, handler, args_json)
    }

    pub fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        self.conn
            .query_row(
                "SELECT job_id, run_at, handler, args_json FROM scheduler_jobs WHERE job_id = ?1",
                params![job_id],
                row_to_job,
            )
            .optional()
            .map_err(StoreError::Database)?
            .transpose()
    }

    pub fn remove(&self, job_id: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM scheduler_jobs WHERE job_id = ?1", params![job_id])?;
        Ok(())
    }

    /// All jobs due at or before `now`, ordered so the most overdue fire first.
    pub fn due_before(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id, run_at, handler, args_json FROM scheduler_jobs
             WHERE run_at <= ?1 ORDER BY run_at ASC",
        )?;
        let rows = stmt.query_map(params![to_rfc3339(&now)], row_to_job)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(StoreError::Database)??);
        }
        Ok(out)
    }
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Result<Job, StoreError>> {
    let run_at_raw: String = row.get(1)?;
    Ok((|| {
        Ok(Job {
            job_id: row.get(0)?,
            run_at: parse_datetime(&run_at_raw)?,
            handler: row.get(2)?,
            args_json: row.get(3)?,
        })
    })())
}
