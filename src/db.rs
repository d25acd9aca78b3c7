use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::sink::{assemble, normalize, ResultSink};

const SUBTREE: &str = "path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/'";
const DESCENDANTS: &str = "substr(path, 1, length(?1) + 1) = ?1 || '/'";

/// Path store backed by a single SQLite table.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn subtree(&self, path: &str) -> Result<Vec<(String, Value)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT path, value FROM nodes WHERE {} ORDER BY path",
            SUBTREE
        ))?;
        let rows = stmt
            .query_map(params![path], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(path, raw)| {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("Corrupt value stored at {}", path))?;
                Ok((path, value))
            })
            .collect()
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS nodes (
            path       TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

#[async_trait]
impl ResultSink for SqliteSink {
    async fn set(&self, path: &str, value: &Value) -> Result<()> {
        let path = normalize(path);
        let raw = serde_json::to_string(value)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM nodes WHERE {}", DESCENDANTS), params![path])?;
        tx.execute(
            "INSERT OR REPLACE INTO nodes (path, value, updated_at)
             VALUES (?1, ?2, datetime('now'))",
            params![path, raw],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let path = normalize(path);
        let nodes = self.subtree(path)?;
        Ok(assemble(path, nodes))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize(path);
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!("SELECT 1 FROM nodes WHERE {} LIMIT 1", SUBTREE),
                params![path],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn delete_subtree(&self, path: &str) -> Result<usize> {
        let path = normalize(path);
        let conn = self.conn()?;
        let removed = conn.execute(&format!("DELETE FROM nodes WHERE {}", SUBTREE), params![path])?;
        Ok(removed)
    }

    async fn paths(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = normalize(prefix);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT path FROM nodes WHERE {} ORDER BY path",
            SUBTREE
        ))?;
        let paths = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }
}
