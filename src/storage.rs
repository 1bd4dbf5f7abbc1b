use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub account_id: i64,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("storage: enable foreign keys")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn upsert_account(&self, mut account: Account) -> Result<i64> {
        if account.user_id <= 0 {
            bail!("storage: forum user id required");
        }
        let now = Utc::now();
        if account.created_at.timestamp() == 0 {
            account.created_at = now;
        }
        account.updated_at = now;

        let conn = self.conn.lock();
        let id: i64 = conn.query_row(
            r#"
INSERT INTO accounts (user_id, username, display_name, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(user_id) DO UPDATE SET
  username = excluded.username,
  display_name = excluded.display_name,
  updated_at = excluded.updated_at
RETURNING id
"#,
            params![
                account.user_id,
                account.username,
                account.display_name,
                account.created_at.timestamp(),
                account.updated_at.timestamp(),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_account_by_id(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT id, user_id, username, display_name, created_at, updated_at
FROM accounts
WHERE id = ?1
"#,
            params![id],
            account_from_row,
        )
        .optional()
        .context("storage: query account by id")
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT id, user_id, username, display_name, created_at, updated_at
FROM accounts
ORDER BY updated_at DESC, id DESC
"#,
        )?;
        let rows = stmt
            .query_map([], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_account(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])
            .context("storage: delete account")?;
        Ok(())
    }

    pub fn upsert_token(&self, token: Token) -> Result<()> {
        if token.account_id == 0 {
            bail!("storage: account id required for token");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO tokens (account_id, access_token, expires_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(account_id) DO UPDATE SET
  access_token = excluded.access_token,
  expires_at = excluded.expires_at
"#,
            params![
                token.account_id,
                token.access_token,
                token.expires_at.map(|dt| dt.timestamp()),
            ],
        )?;
        Ok(())
    }

    pub fn get_token(&self, account_id: i64) -> Result<Option<Token>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT account_id, access_token, expires_at
FROM tokens
WHERE account_id = ?1
"#,
            params![account_id],
            |row| {
                let expires: Option<i64> = row.get(2)?;
                Ok(Token {
                    account_id: row.get(0)?,
                    access_token: row.get(1)?,
                    expires_at: expires.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
                })
            },
        )
        .optional()
        .context("storage: query token")
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let created: i64 = row.get(4)?;
    let updated: i64 = row.get(5)?;
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        display_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        created_at: Utc
            .timestamp_opt(created, 0)
            .single()
            .unwrap_or_else(Utc::now),
        updated_at: Utc
            .timestamp_opt(updated, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS accounts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id INTEGER NOT NULL UNIQUE,
  username TEXT NOT NULL,
  display_name TEXT,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
  account_id INTEGER PRIMARY KEY,
  access_token TEXT NOT NULL,
  expires_at INTEGER,
  FOREIGN KEY(account_id) REFERENCES accounts(id) ON DELETE CASCADE
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("forum-tui").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp(dir: &tempfile::TempDir) -> Store {
        Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap()
    }

    fn account(user_id: i64, username: &str) -> Account {
        Account {
            id: 0,
            user_id,
            username: username.into(),
            display_name: String::new(),
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
            updated_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let store = open_temp(&dir);
        assert!(dir.path().join("state.db").exists());
        assert!(store.list_accounts().unwrap().is_empty());
    }

    #[test]
    fn upsert_account_is_keyed_by_user_id() {
        let dir = tempdir().unwrap();
        let store = open_temp(&dir);
        let first = store.upsert_account(account(7, "ada")).unwrap();
        let second = store.upsert_account(account(7, "ada_l")).unwrap();
        assert_eq!(first, second);
        let accounts = store.list_accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].username, "ada_l");
    }

    #[test]
    fn token_round_trips_and_cascades() {
        let dir = tempdir().unwrap();
        let store = open_temp(&dir);
        let id = store.upsert_account(account(3, "bob")).unwrap();
        store
            .upsert_token(Token {
                account_id: id,
                access_token: "abc".into(),
                expires_at: None,
            })
            .unwrap();
        let token = store.get_token(id).unwrap().unwrap();
        assert_eq!(token.access_token, "abc");
        assert!(!token.is_expired(Utc::now()));

        store.delete_account(id).unwrap();
        assert!(store.get_token(id).unwrap().is_none());
    }
}
