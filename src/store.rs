//! Durable storage for crawl results, the link graph and check reports.

use crate::error::StorageError;
use crate::results::{LinkEdge, PageResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pages (
  url TEXT PRIMARY KEY,
  status INTEGER,
  title TEXT,
  description TEXT,
  h1_count INTEGER,
  image_count INTEGER,
  link_count INTEGER,
  first_contentful_paint REAL,
  largest_contentful_paint REAL,
  time_to_interactive REAL,
  html TEXT,
  crawled_at TEXT,
  error TEXT
);
CREATE INDEX IF NOT EXISTS idx_pages_crawled_at ON pages (crawled_at);
CREATE TABLE IF NOT EXISTS links (
  from_url TEXT NOT NULL,
  to_url TEXT NOT NULL,
  UNIQUE (from_url, to_url)
);
CREATE TABLE IF NOT EXISTS reports (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  kind TEXT NOT NULL,
  status TEXT NOT NULL,
  created_at TEXT NOT NULL,
  body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reports_kind ON reports (kind, id);
";

const PAGE_COLUMNS: &str = "url, status, title, description, h1_count, image_count, link_count, \
     first_contentful_paint, largest_contentful_paint, time_to_interactive, html, crawled_at, error";

/// Keyed persistence of page results and link edges.
///
/// Writes are idempotent: pages replace by URL, edges dedupe on
/// `(from, to)`. No write depends on another, so a crash between a page and
/// its edges loses edges at worst.
pub trait ResultStore: Send + Sync {
    /// Replace the row for `page.url`, clearing any previous error
    fn upsert_page(&self, page: &PageResult) -> Result<(), StorageError>;

    /// Annotate the row for `url` with `error`. Fields from an earlier
    /// successful crawl are kept as the last known good values.
    fn upsert_page_error(&self, url: &str, error: &str) -> Result<(), StorageError>;

    /// Returns false when the edge already existed
    fn insert_link_edge(&self, from_url: &str, to_url: &str) -> Result<bool, StorageError>;

    fn get_page(&self, url: &str) -> Result<Option<PageResult>, StorageError>;

    /// Most recently written pages first
    fn list_recent_pages(&self, limit: usize) -> Result<Vec<PageResult>, StorageError>;

    fn list_links(&self, limit: usize) -> Result<Vec<LinkEdge>, StorageError>;
}

/// Run `work` against `store` on the blocking thread pool. Store calls are
/// synchronous SQLite I/O, so async callers go through here.
pub async fn run_blocking<S, T, F>(store: &Arc<S>, work: F) -> Result<T, StorageError>
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StorageError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || work(store.as_ref())).await?
}

/// A persisted monitoring or compatibility report
#[derive(Debug, Clone, Serialize)]
pub struct StoredReport {
    pub id: i64,
    pub kind: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub body: serde_json::Value,
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Append a check report
    pub fn record_report(
        &self,
        kind: &str,
        status: &str,
        created_at: DateTime<Utc>,
        body: &impl Serialize,
    ) -> Result<i64, StorageError> {
        let body = serde_json::to_string(body)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reports (kind, status, created_at, body) VALUES (?1, ?2, ?3, ?4)",
            params![kind, status, timestamp(created_at), body],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest reports first, optionally of one kind only
    pub fn list_reports(
        &self,
        kind: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredReport>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, status, created_at, body FROM reports
             WHERE (?1 IS NULL OR kind = ?1)
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![kind, sql_limit(limit)], |row| {
            let created_at: String = row.get(3)?;
            let body: String = row.get(4)?;
            Ok(StoredReport {
                id: row.get(0)?,
                kind: row.get(1)?,
                status: row.get(2)?,
                created_at: parse_datetime(&created_at),
                body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl ResultStore for SqliteStore {
    fn upsert_page(&self, page: &PageResult) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "REPLACE INTO pages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL)",
                PAGE_COLUMNS
            ),
            params![
                page.url,
                page.status,
                page.title,
                page.description,
                page.h1_count,
                page.image_count,
                page.link_count,
                page.first_contentful_paint,
                page.largest_contentful_paint,
                page.time_to_interactive,
                page.html,
                timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn upsert_page_error(&self, url: &str, error: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pages (url, error, crawled_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (url) DO UPDATE SET error = excluded.error, crawled_at = excluded.crawled_at",
            params![url, error, timestamp(Utc::now())],
        )?;
        Ok(())
    }

    fn insert_link_edge(&self, from_url: &str, to_url: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO links (from_url, to_url) VALUES (?1, ?2)",
            params![from_url, to_url],
        )?;
        Ok(inserted > 0)
    }

    fn get_page(&self, url: &str) -> Result<Option<PageResult>, StorageError> {
        let conn = self.conn()?;
        let page = conn
            .query_row(
                &format!("SELECT {} FROM pages WHERE url = ?1", PAGE_COLUMNS),
                params![url],
                page_from_row,
            )
            .optional()?;
        Ok(page)
    }

    fn list_recent_pages(&self, limit: usize) -> Result<Vec<PageResult>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pages ORDER BY crawled_at DESC, url LIMIT ?1",
            PAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![sql_limit(limit)], page_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn list_links(&self, limit: usize) -> Result<Vec<LinkEdge>, StorageError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT from_url, to_url FROM links ORDER BY rowid LIMIT ?1")?;
        let rows = stmt.query_map(params![sql_limit(limit)], |row| {
            Ok(LinkEdge {
                from_url: row.get(0)?,
                to_url: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageResult> {
    let status: Option<i64> = row.get(1)?;
    let crawled_at: Option<String> = row.get(11)?;
    Ok(PageResult {
        url: row.get(0)?,
        status: status.and_then(|s| u16::try_from(s).ok()),
        title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        h1_count: row.get::<_, Option<u32>>(4)?.unwrap_or_default(),
        image_count: row.get::<_, Option<u32>>(5)?.unwrap_or_default(),
        link_count: row.get::<_, Option<u32>>(6)?.unwrap_or_default(),
        first_contentful_paint: row.get::<_, Option<f64>>(7)?.unwrap_or_default(),
        largest_contentful_paint: row.get::<_, Option<f64>>(8)?.unwrap_or_default(),
        time_to_interactive: row.get::<_, Option<f64>>(9)?.unwrap_or_default(),
        html: row.get(10)?,
        crawled_at: crawled_at.as_deref().map(parse_datetime),
        error: row.get(12)?,
    })
}

/// SQLite treats a negative LIMIT as unbounded, so clamp instead of wrapping
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
