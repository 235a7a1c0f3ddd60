//! Job persistence.
//!
//! [`JobStore`] is the contract the evaluator relies on: list awaiting jobs
//! and write a new state back only if nobody else wrote first. The SQLite
//! implementation keeps the full history as JSON next to a version counter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{error, info};
use verdant_core::JobId;

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::job::Job;
use crate::state::{JobState, StateKind};

pub trait JobStore: Send + Sync {
    /// Persist a new job. Sets its version to 1.
    fn insert(&self, job: &mut Job) -> Result<()>;

    fn get(&self, id: &JobId) -> Result<Job>;

    /// One page of jobs currently awaiting a decision, oldest first.
    ///
    /// Pass `None` for the first page and the returned `next` cursor for the
    /// following ones; `next` is `None` once the last page has been read.
    fn list_awaiting(&self, after: Option<&AwaitingCursor>, limit: usize) -> Result<AwaitingPage>;

    /// Write `job` back if the stored version still equals `job.version()`.
    ///
    /// On success the job's version is bumped. A lost race yields
    /// [`SchedulerError::ConcurrentModification`] and leaves the row untouched.
    fn save(&self, job: &mut Job) -> Result<()>;
}

/// Position just past the last row of a page: `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwaitingCursor {
    created_at: String,
    id: String,
}

#[derive(Debug, Default)]
pub struct AwaitingPage {
    pub jobs: Vec<Job>,
    pub next: Option<AwaitingCursor>,
}

/// [`JobStore`] backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: &mut Job) -> Result<()> {
        let history = serde_json::to_string(job.history())?;
        let created_at = timestamp(job.history()[0].created_at());
        let updated_at = timestamp(job.state().created_at());

        self.conn().execute(
            "INSERT INTO jobs (id, name, state, history, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
            rusqlite::params![
                job.id().as_str(),
                job.name(),
                job.state_kind().as_str(),
                history,
                created_at,
                updated_at
            ],
        )?;
        job.set_version(1);
        info!(job_id = %job.id(), name = %job.name(), state = %job.state_kind(), "job stored");
        Ok(())
    }

    fn get(&self, id: &JobId) -> Result<Job> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, name, state, history, version FROM jobs WHERE id = ?1",
                [id.as_str()],
                read_row,
            )
            .optional()?;
        match row {
            Some(row) => decode(row),
            None => Err(SchedulerError::JobNotFound { id: id.to_string() }),
        }
    }

    fn list_awaiting(&self, after: Option<&AwaitingCursor>, limit: usize) -> Result<AwaitingPage> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, state, history, version, created_at FROM jobs
             WHERE state = ?1 AND (?2 IS NULL OR (created_at, id) > (?2, ?3))
             ORDER BY created_at, id LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![
                    StateKind::Awaiting.as_str(),
                    after.map(|c| c.created_at.as_str()),
                    after.map(|c| c.id.as_str()),
                    limit as i64
                ],
                |row| Ok((read_row(row)?, row.get::<_, String>(5)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // The cursor follows the raw rows so unreadable ones are not re-read.
        let next = match rows.last() {
            Some((row, created_at)) if rows.len() >= limit => Some(AwaitingCursor {
                created_at: created_at.clone(),
                id: row.0.clone(),
            }),
            _ => None,
        };

        let jobs = rows
            .into_iter()
            .filter_map(|(row, _)| {
                let id = row.0.clone();
                match decode(row) {
                    Ok(job) => Some(job),
                    Err(e) => {
                        error!(job_id = %id, code = e.code(), "skipping unreadable job: {e}");
                        None
                    }
                }
            })
            .collect();
        Ok(AwaitingPage { jobs, next })
    }

    fn save(&self, job: &mut Job) -> Result<()> {
        let history = serde_json::to_string(job.history())?;
        let updated_at = timestamp(job.state().created_at());
        let expected = job.version();

        let conn = self.conn();
        let n = conn.execute(
            "UPDATE jobs SET state = ?1, history = ?2, version = version + 1, updated_at = ?3
             WHERE id = ?4 AND version = ?5",
            rusqlite::params![
                job.state_kind().as_str(),
                history,
                updated_at,
                job.id().as_str(),
                expected as i64
            ],
        )?;
        if n == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
                [job.id().as_str()],
                |row| row.get(0),
            )?;
            return Err(if exists {
                SchedulerError::ConcurrentModification {
                    id: job.id().to_string(),
                    expected_version: expected,
                }
            } else {
                SchedulerError::JobNotFound {
                    id: job.id().to_string(),
                }
            });
        }
        job.set_version(expected + 1);
        Ok(())
    }
}

/// Fixed-width UTC timestamps, so text order matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

type Row = (String, String, String, String, i64);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok((
        row.get(0)?, // id
        row.get(1)?, // name
        row.get(2)?, // state
        row.get(3)?, // history JSON
        row.get(4)?, // version
    ))
}

fn decode((id, name, state, history, version): Row) -> Result<Job> {
    let kind: StateKind = state.parse()?;
    let history: Vec<JobState> = serde_json::from_str(&history)?;
    let job = Job::from_parts(JobId(id), name, version as u64, history)?;
    if job.state_kind() != kind {
        return Err(SchedulerError::UnexpectedState {
            expected: kind,
            actual: job.state_kind(),
        });
    }
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use verdant_core::Period;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 12, 11, 0, 0).unwrap()
    }

    fn deferred(name: &str, minutes_later: i64) -> Job {
        let created = now() + Duration::minutes(minutes_later);
        let period = Period::between(created, created + Duration::hours(8)).unwrap();
        Job::deferred(name, period, created)
    }

    #[test]
    fn insert_then_get_returns_same_job() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let mut job = deferred("nightly-report", 0);
        store.insert(&mut job).unwrap();
        assert_eq!(job.version(), 1);

        let loaded = store.get(job.id()).unwrap();
        assert_eq!(loaded, job);
    }

    #[test]
    fn get_unknown_id_is_not_found() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let err = store.get(&JobId::from("missing")).unwrap_err();
        assert_eq!(err.code(), "JOB_NOT_FOUND");
    }

    #[test]
    fn list_awaiting_pages_in_creation_order() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let mut second = deferred("second", 10);
        let mut first = deferred("first", 0);
        let mut third = deferred("third", 20);
        let mut done = Job::new("done", JobState::enqueued(now()));
        for job in [&mut second, &mut first, &mut third, &mut done] {
            store.insert(job).unwrap();
        }

        let page = store.list_awaiting(None, 2).unwrap();
        let names: Vec<&str> = page.jobs.iter().map(|j| j.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(page.next.is_some());

        let rest = store.list_awaiting(page.next.as_ref(), 2).unwrap();
        let names: Vec<&str> = rest.jobs.iter().map(|j| j.name()).collect();
        assert_eq!(names, vec!["third"]);
        assert!(rest.next.is_none());

        assert_eq!(store.list_awaiting(None, 100).unwrap().jobs.len(), 3);
    }

    #[test]
    fn pages_break_ties_on_id() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d", "e"] {
            let mut job = deferred(name, 0);
            store.insert(&mut job).unwrap();
            ids.push(job.id().to_string());
        }
        ids.sort();

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.list_awaiting(cursor.as_ref(), 2).unwrap();
            seen.extend(page.jobs.iter().map(|j| j.id().to_string()));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn save_bumps_version_and_moves_state() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let mut job = deferred("cleanup", 0);
        store.insert(&mut job).unwrap();

        job.exit_awaiting(JobState::enqueued(now())).unwrap();
        store.save(&mut job).unwrap();
        assert_eq!(job.version(), 2);

        let loaded = store.get(job.id()).unwrap();
        assert_eq!(loaded.state_kind(), StateKind::Enqueued);
        assert_eq!(loaded.history().len(), 2);
        assert!(store.list_awaiting(None, 10).unwrap().jobs.is_empty());
    }

    #[test]
    fn stale_writer_loses() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let mut job = deferred("contended", 0);
        store.insert(&mut job).unwrap();

        let mut a = store.get(job.id()).unwrap();
        let mut b = store.get(job.id()).unwrap();
        a.exit_awaiting(JobState::enqueued(now())).unwrap();
        store.save(&mut a).unwrap();

        b.exit_awaiting(JobState::scheduled(now(), "later", now())).unwrap();
        match store.save(&mut b) {
            Err(SchedulerError::ConcurrentModification {
                expected_version, ..
            }) => assert_eq!(expected_version, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.get(job.id()).unwrap().state_kind(), StateKind::Enqueued);
    }

    #[test]
    fn save_of_unknown_job_is_not_found() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let mut job = deferred("ghost", 0);
        assert_eq!(store.save(&mut job).unwrap_err().code(), "JOB_NOT_FOUND");
    }

    #[test]
    fn unknown_stored_state_fails_loudly() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO jobs (id, name, state, history, version, created_at, updated_at)
                 VALUES ('x', 'odd', 'RETRYING', '[]', 1, '2024-03-12', '2024-03-12')",
                [],
            )
            .unwrap();
        let err = store.get(&JobId::from("x")).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_STATE");
    }
}
