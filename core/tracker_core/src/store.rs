//! SQLite persistence for daily logs, topic history and room progress.
//!
//! Every function normalizes topic keys itself, so callers cannot store or look
//! up history under a differently-cased key.

use crate::model::{normalize_tasks, normalize_topic, parse_date, DailyLogRecord};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A day's log exactly as it was saved.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StoredLog {
    pub date: String,
    pub notes: Option<String>,
    pub completed_tasks: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RoomProgress {
    pub room_id: String,
    pub completed: bool,
    pub updated_at: String,
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS daily_logs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  owner TEXT NOT NULL,
  log_date TEXT NOT NULL,
  notes TEXT,
  completed_tasks_json TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  UNIQUE(owner, log_date)
);
CREATE INDEX IF NOT EXISTS idx_daily_logs_owner_date ON daily_logs(owner, log_date);

CREATE TABLE IF NOT EXISTS topic_history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  owner TEXT NOT NULL,
  topic TEXT NOT NULL,
  entry TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_topic_history_owner_topic ON topic_history(owner, topic, id);

CREATE TABLE IF NOT EXISTS room_progress (
  owner TEXT NOT NULL,
  room_id TEXT NOT NULL,
  completed INTEGER NOT NULL DEFAULT 0,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (owner, room_id)
);
"#,
    )
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// Create or replace the (owner, date) row in one statement.
pub fn upsert_log(
    conn: &Connection,
    owner: &str,
    log_date: Date,
    notes: Option<&str>,
    completed_tasks: &Map<String, Value>,
) -> Result<()> {
    let tasks_json = serde_json::to_string(completed_tasks)?;
    conn.execute(
        r#"
INSERT INTO daily_logs (owner, log_date, notes, completed_tasks_json, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(owner, log_date) DO UPDATE SET
  notes=excluded.notes,
  completed_tasks_json=excluded.completed_tasks_json,
  updated_at=excluded.updated_at
        "#,
        (owner, log_date.to_string(), notes, tasks_json, now_rfc3339()),
    )?;
    Ok(())
}

/// Upsert the day and record every done task in topic history, atomically.
///
/// Returns the number of history rows appended.
pub fn save_log(
    conn: &mut Connection,
    owner: &str,
    log_date: Date,
    notes: Option<&str>,
    completed_tasks: &Map<String, Value>,
) -> Result<usize> {
    let tx = conn.transaction()?;
    upsert_log(&tx, owner, log_date, notes, completed_tasks)?;
    let mut appended = 0;
    for (topic, entry) in normalize_tasks(completed_tasks) {
        let task = entry.task.trim();
        if entry.done && !task.is_empty() && append_history(&tx, owner, &topic, task)? {
            appended += 1;
        }
    }
    tx.commit()?;
    Ok(appended)
}

pub fn load_log(conn: &Connection, owner: &str, log_date: Date) -> Result<Option<StoredLog>> {
    let row = conn
        .query_row(
            "SELECT log_date, notes, completed_tasks_json FROM daily_logs WHERE owner = ?1 AND log_date = ?2",
            (owner, log_date.to_string()),
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    Ok(row.map(|(date, notes, tasks_json)| StoredLog {
        completed_tasks: parse_tasks_json(&date, &tasks_json),
        date,
        notes,
    }))
}

/// Every log for `owner` as saved, date ascending.
pub fn list_logs(conn: &Connection, owner: &str) -> Result<Vec<StoredLog>> {
    let mut stmt = conn.prepare(
        "SELECT log_date, notes, completed_tasks_json FROM daily_logs WHERE owner = ?1 ORDER BY log_date ASC",
    )?;
    let rows = stmt.query_map([owner], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut out = Vec::new();
    for r in rows {
        let (date, notes, tasks_json) = r?;
        out.push(StoredLog {
            completed_tasks: parse_tasks_json(&date, &tasks_json),
            date,
            notes,
        });
    }
    Ok(out)
}

/// Canonical records for the aggregator. Rows with an unparseable date are skipped.
pub fn fetch_logs(conn: &Connection, owner: &str) -> Result<Vec<DailyLogRecord>> {
    let mut out = Vec::new();
    for log in list_logs(conn, owner)? {
        let Some(log_date) = parse_date(&log.date) else {
            warn!("skipping log with invalid date {:?}", log.date);
            continue;
        };
        out.push(DailyLogRecord {
            owner: owner.to_string(),
            log_date,
            notes: log.notes,
            completed_tasks: normalize_tasks(&log.completed_tasks),
        });
    }
    Ok(out)
}

fn parse_tasks_json(date: &str, tasks_json: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(tasks_json) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => Map::new(),
        Ok(_) | Err(_) => {
            warn!("completed_tasks for {date} is not an object; treating as empty");
            Map::new()
        }
    }
}

/// Append `entry` to the (owner, topic) history.
///
/// An entry identical to one already recorded is skipped; returns whether a row
/// was written. Rows are never updated or deleted.
pub fn append_history(conn: &Connection, owner: &str, topic: &str, entry: &str) -> Result<bool> {
    let topic = normalize_topic(topic);
    let entry = entry.trim();
    if topic.is_empty() || entry.is_empty() {
        return Ok(false);
    }
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM topic_history WHERE owner = ?1 AND topic = ?2 AND entry = ?3)",
        (owner, &topic, entry),
        |row| row.get(0),
    )?;
    if exists {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO topic_history (owner, topic, entry, created_at) VALUES (?1, ?2, ?3, ?4)",
        (owner, &topic, entry, now_rfc3339()),
    )?;
    Ok(true)
}

/// The `limit` most recent entries for (owner, topic), oldest first.
pub fn fetch_recent_history(
    conn: &Connection,
    owner: &str,
    topic: &str,
    limit: usize,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT entry FROM topic_history WHERE owner = ?1 AND topic = ?2 ORDER BY id DESC LIMIT ?3",
    )?;
    let rows = stmt.query_map((owner, normalize_topic(topic), limit as i64), |row| {
        row.get::<_, String>(0)
    })?;
    let mut out = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    out.reverse();
    Ok(out)
}

pub fn fetch_all_history(conn: &Connection, owner: &str, topic: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT entry FROM topic_history WHERE owner = ?1 AND topic = ?2 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map((owner, normalize_topic(topic)), |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn set_room_progress(
    conn: &Connection,
    owner: &str,
    room_id: &str,
    completed: bool,
) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO room_progress (owner, room_id, completed, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(owner, room_id) DO UPDATE SET
  completed=excluded.completed,
  updated_at=excluded.updated_at
        "#,
        (owner, room_id.trim(), completed as i64, now_rfc3339()),
    )?;
    Ok(())
}

pub fn list_room_progress(conn: &Connection, owner: &str) -> Result<Vec<RoomProgress>> {
    let mut stmt = conn.prepare(
        "SELECT room_id, completed, updated_at FROM room_progress WHERE owner = ?1 ORDER BY room_id ASC",
    )?;
    let rows = stmt.query_map([owner], |row| {
        let completed: i64 = row.get(1)?;
        Ok(RoomProgress {
            room_id: row.get(0)?,
            completed: completed != 0,
            updated_at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
