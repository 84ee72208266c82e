//! Periodic database snapshots.
//!
//! Runs on its own SQLite connection so it never waits on the request mutex.

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::{Date, OffsetDateTime};
use tracing::{error, info};

const PREFIX: &str = "tracker-";
const SUFFIX: &str = ".db";

#[derive(Clone, Debug)]
pub struct BackupConfig {
    pub db: PathBuf,
    pub dir: PathBuf,
    pub interval: Duration,
    pub keep: usize,
}

pub fn backup_path(dir: &Path, date: Date) -> PathBuf {
    dir.join(format!("{PREFIX}{date}{SUFFIX}"))
}

/// Snapshot `db` into `dir`, replacing any snapshot already taken on `date`.
pub fn run_backup(db: &Path, dir: &Path, date: Date) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let target = backup_path(dir, date);
    if target.exists() {
        std::fs::remove_file(&target)?;
    }
    let conn = Connection::open(db)?;
    let target_str = target
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("backup path is not valid UTF-8: {}", target.display()))?;
    conn.execute("VACUUM INTO ?1", [target_str])?;
    Ok(target)
}

/// Delete the oldest snapshots so at most `keep` remain. Returns removed paths.
pub fn prune_backups(dir: &Path, keep: usize) -> anyhow::Result<Vec<PathBuf>> {
    let mut snapshots: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_snapshot = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(SUFFIX));
        if is_snapshot {
            snapshots.push(path);
        }
    }
    // tracker-YYYY-MM-DD.db sorts chronologically.
    snapshots.sort();
    let excess = snapshots.len().saturating_sub(keep);
    let removed: Vec<PathBuf> = snapshots.into_iter().take(excess).collect();
    for path in &removed {
        std::fs::remove_file(path)?;
    }
    Ok(removed)
}

pub async fn backup_loop(config: BackupConfig) {
    let mut ticker = tokio::time::interval(config.interval);
    loop {
        ticker.tick().await;
        let cfg = config.clone();
        let today = OffsetDateTime::now_utc().date();
        let result = tokio::task::spawn_blocking(move || {
            let path = run_backup(&cfg.db, &cfg.dir, today)?;
            let removed = prune_backups(&cfg.dir, cfg.keep.max(1))?;
            Ok::<_, anyhow::Error>((path, removed))
        })
        .await;
        match result {
            Ok(Ok((path, removed))) => {
                info!("backup written to {}", path.display());
                if !removed.is_empty() {
                    info!("pruned {} old backup(s)", removed.len());
                }
            }
            Ok(Err(err)) => error!("backup failed: {err:#}"),
            Err(err) => error!("backup task panicked: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::parse_date, store};

    #[test]
    fn backup_copies_database() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("tracker.db");
        {
            let conn = Connection::open(&db).unwrap();
            store::init_db(&conn).unwrap();
            store::append_history(&conn, "local", "htb", "owned Lame").unwrap();
        }

        let dir = tmp.path().join("backups");
        let date = parse_date("2024-01-05").unwrap();
        let path = run_backup(&db, &dir, date).unwrap();
        assert_eq!(path, dir.join("tracker-2024-01-05.db"));

        let copy = Connection::open(&path).unwrap();
        assert_eq!(
            store::fetch_all_history(&copy, "local", "htb").unwrap(),
            vec!["owned Lame".to_string()]
        );
        drop(copy);

        // Same day overwrites instead of failing.
        run_backup(&db, &dir, date).unwrap();
    }

    #[test]
    fn prune_keeps_newest() {
        let tmp = tempfile::tempdir().unwrap();
        for d in ["2024-01-01", "2024-01-03", "2024-01-02", "2024-01-04"] {
            std::fs::write(tmp.path().join(format!("tracker-{d}.db")), b"x").unwrap();
        }
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let removed = prune_backups(tmp.path(), 2).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!tmp.path().join("tracker-2024-01-01.db").exists());
        assert!(!tmp.path().join("tracker-2024-01-02.db").exists());
        assert!(tmp.path().join("tracker-2024-01-03.db").exists());
        assert!(tmp.path().join("tracker-2024-01-04.db").exists());
        assert!(tmp.path().join("notes.txt").exists());
    }
}
