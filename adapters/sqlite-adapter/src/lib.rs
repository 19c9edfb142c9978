//! sqlite-adapter: SQLite implementation of the storage ports for local/dev.
//!
//! Purpose
//! - Provide a lightweight, file-based store to run the system locally
//!   without external services.
//! - Implements `LinkStore` and `AccountRepository` from the `domain` crate.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - One connection behind a mutex; every port method runs inside a single
//!   transaction, which gives per-call atomicity.
//! - Stores timestamps as milliseconds since UNIX_EPOCH.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{
    Account, AccountId, AccountRepository, CoreError, CreatorMatch, LinkFilter, LinkRecord,
    LinkStore, ShortId, UserEmail, VisitEvent,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

/// SQLite-backed store for links, visits and accounts.
pub struct SqliteRepo {
    conn: Mutex<Connection>,
}

impl SqliteRepo {
    /// Open (or create) a SQLite database at the given path and ensure schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(map_sqerr)?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CoreError> {
        self.conn.lock().map_err(|_| CoreError::StoreUnavailable("mutex poisoned".into()))
    }
}

fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            short_id TEXT PRIMARY KEY,
            target_url TEXT NOT NULL,
            created_by TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_links_created_by ON links(created_by);
        CREATE TABLE IF NOT EXISTS visits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            short_id TEXT NOT NULL,
            visited_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_visits_short_id ON visits(short_id);
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
    )
    .map_err(map_sqerr)
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> CoreError { CoreError::StoreUnavailable(format!("sqlite error: {e}")) }

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation)
}

fn system_time_to_millis(t: SystemTime) -> i64 { t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis() as i64 }
fn millis_to_system_time(ms: i64) -> SystemTime { UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64) }

/// Render a filter as a WHERE clause with positional string arguments.
fn filter_sql(filter: &LinkFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    if let Some(ids) = &filter.short_ids {
        if ids.is_empty() {
            clauses.push("0".into());
        } else {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", args.len() + i)).collect();
            clauses.push(format!("short_id IN ({})", placeholders.join(", ")));
            args.extend(ids.iter().map(|id| id.as_str().to_string()));
        }
    }
    match &filter.created_by {
        None => {}
        Some(CreatorMatch::Anonymous) => clauses.push("created_by IS NULL".into()),
        Some(CreatorMatch::Account(account)) => {
            args.push(account.as_str().to_string());
            clauses.push(format!("created_by = ?{}", args.len()));
        }
    }
    let where_clause = if clauses.is_empty() { "1".to_string() } else { clauses.join(" AND ") };
    (where_clause, args)
}

struct LinkRow {
    short_id: String,
    target_url: String,
    created_by: Option<String>,
    created_at: i64,
}

fn select_links(conn: &Connection, filter: &LinkFilter, limit: Option<usize>) -> Result<Vec<LinkRow>, CoreError> {
    let (where_clause, args) = filter_sql(filter);
    let mut sql = format!(
        "SELECT short_id, target_url, created_by, created_at FROM links WHERE {where_clause} ORDER BY created_at DESC, rowid DESC"
    );
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {n}"));
    }
    let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
    let mut rows = stmt.query(params_from_iter(args.iter())).map_err(map_sqerr)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_sqerr)? {
        out.push(LinkRow {
            short_id: row.get(0).map_err(map_sqerr)?,
            target_url: row.get(1).map_err(map_sqerr)?,
            created_by: row.get(2).map_err(map_sqerr)?,
            created_at: row.get(3).map_err(map_sqerr)?,
        });
    }
    Ok(out)
}

fn load_visits(conn: &Connection, short_id: &str) -> Result<Vec<VisitEvent>, CoreError> {
    let mut stmt = conn
        .prepare("SELECT visited_at FROM visits WHERE short_id = ?1 ORDER BY id")
        .map_err(map_sqerr)?;
    let mut rows = stmt.query(params![short_id]).map_err(map_sqerr)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_sqerr)? {
        let ms: i64 = row.get(0).map_err(map_sqerr)?;
        out.push(VisitEvent { timestamp: millis_to_system_time(ms) });
    }
    Ok(out)
}

fn row_to_record(conn: &Connection, row: LinkRow) -> Result<LinkRecord, CoreError> {
    let visits = load_visits(conn, &row.short_id)?;
    let short_id = ShortId::new(row.short_id).map_err(|e| CoreError::StoreUnavailable(format!("bad short id in db: {e}")))?;
    let created_by = row
        .created_by
        .map(AccountId::new)
        .transpose()
        .map_err(|_| CoreError::StoreUnavailable("bad created_by".into()))?;
    Ok(LinkRecord {
        short_id,
        target_url: row.target_url,
        created_by,
        created_at: millis_to_system_time(row.created_at),
        visits,
    })
}

impl LinkStore for SqliteRepo {
    fn insert_unique(&self, record: LinkRecord) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        let res = tx.execute(
            "INSERT INTO links(short_id, target_url, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.short_id.as_str(),
                record.target_url,
                record.created_by.as_ref().map(AccountId::as_str),
                system_time_to_millis(record.created_at),
            ],
        );
        match res {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => return Err(CoreError::AlreadyExists),
            Err(e) => return Err(map_sqerr(e)),
        }
        for v in &record.visits {
            tx.execute(
                "INSERT INTO visits(short_id, visited_at) VALUES (?1, ?2)",
                params![record.short_id.as_str(), system_time_to_millis(v.timestamp)],
            )
            .map_err(map_sqerr)?;
        }
        tx.commit().map_err(map_sqerr)
    }

    fn find_one(&self, filter: &LinkFilter) -> Result<Option<LinkRecord>, CoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        let row = select_links(&tx, filter, Some(1))?.into_iter().next();
        let record = row.map(|r| row_to_record(&tx, r)).transpose()?;
        tx.commit().map_err(map_sqerr)?;
        Ok(record)
    }

    fn find_many(&self, filter: &LinkFilter) -> Result<Vec<LinkRecord>, CoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        let rows = select_links(&tx, filter, None)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row_to_record(&tx, row)?);
        }
        tx.commit().map_err(map_sqerr)?;
        Ok(out)
    }

    fn append_visit(&self, id: &ShortId, event: VisitEvent) -> Result<Option<LinkRecord>, CoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        // Conditional insert keeps the sequence non-decreasing and only
        // touches existing links.
        let changed = tx
            .execute(
                "INSERT INTO visits(short_id, visited_at)
                 SELECT ?1, MAX(?2, COALESCE((SELECT MAX(visited_at) FROM visits WHERE short_id = ?1), ?2))
                 WHERE EXISTS (SELECT 1 FROM links WHERE short_id = ?1)",
                params![id.as_str(), system_time_to_millis(event.timestamp)],
            )
            .map_err(map_sqerr)?;
        if changed == 0 {
            return Ok(None);
        }
        let row = select_links(&tx, &LinkFilter::by_id(id), Some(1))?.into_iter().next();
        let record = row.map(|r| row_to_record(&tx, r)).transpose()?;
        tx.commit().map_err(map_sqerr)?;
        Ok(record)
    }

    fn delete_one(&self, filter: &LinkFilter) -> Result<bool, CoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        let Some(row) = select_links(&tx, filter, Some(1))?.into_iter().next() else {
            return Ok(false);
        };
        tx.execute("DELETE FROM links WHERE short_id = ?1", params![row.short_id]).map_err(map_sqerr)?;
        let visits = tx.execute("DELETE FROM visits WHERE short_id = ?1", params![row.short_id]).map_err(map_sqerr)?;
        tx.commit().map_err(map_sqerr)?;
        debug!(short_id = %row.short_id, visits, "sqlite link deleted");
        Ok(true)
    }
}

impl AccountRepository for SqliteRepo {
    fn create(&self, account: Account) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let res = conn.execute(
            "INSERT INTO accounts(id, name, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account.id.as_str(),
                account.name,
                account.email.as_str(),
                account.password_hash,
                system_time_to_millis(account.created_at),
            ],
        );
        match res {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(CoreError::AlreadyExists),
            Err(e) => Err(map_sqerr(e)),
        }
    }

    fn find_by_email(&self, email: &UserEmail) -> Result<Option<Account>, CoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, name, email, password_hash, created_at FROM accounts WHERE email = ?1",
                params![email.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(map_sqerr)?;
        let Some((id, name, email, password_hash, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(Account {
            id: AccountId::new(id).map_err(|_| CoreError::StoreUnavailable("bad account id".into()))?,
            name,
            email: UserEmail::new(email).map_err(|_| CoreError::StoreUnavailable("bad email".into()))?,
            password_hash,
            created_at: millis_to_system_time(created_at),
        }))
    }
}
