use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use compass_core::Role;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

/// Turns retained per user by the in-memory store.
pub const MAX_TURNS_PER_USER: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only conversation log, keyed by user.
pub trait TurnLog: Send + Sync {
    async fn append(&self, user_id: &str, role: Role, content: &str) -> Result<()>;
    /// Most recent `limit` turns, oldest first.
    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>>;
    async fn clear(&self, user_id: &str) -> Result<u64>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    turns: Arc<RwLock<HashMap<String, VecDeque<Turn>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnLog for MemoryStore {
    async fn append(&self, user_id: &str, role: Role, content: &str) -> Result<()> {
        let mut turns = self.turns.write();
        let log = turns.entry(user_id.to_string()).or_default();
        log.push_back(Turn {
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        while log.len() > MAX_TURNS_PER_USER {
            log.pop_front();
        }
        Ok(())
    }

    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let turns = self.turns.read();
        let Some(log) = turns.get(user_id) else {
            return Ok(Vec::new());
        };
        let skip = log.len().saturating_sub(limit);
        Ok(log.iter().skip(skip).cloned().collect())
    }

    async fn clear(&self, user_id: &str) -> Result<u64> {
        let removed = self
            .turns
            .write()
            .remove(user_id)
            .map(|log| log.len() as u64)
            .unwrap_or(0);
        Ok(removed)
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Every connection to `:memory:` opens a distinct database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id TEXT NOT NULL,
              role TEXT NOT NULL,
              content TEXT NOT NULL,
              created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed creating turns table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_user ON turns (user_id, id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

impl TurnLog for SqliteStore {
    async fn append(&self, user_id: &str, role: Role, content: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO turns (user_id, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(user_id)
        .bind(role.as_str())
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let rows = sqlx::query(
            r#"
            SELECT role, content, created_at
            FROM (
              SELECT id, role, content, created_at
              FROM turns
              WHERE user_id = ?1
              ORDER BY id DESC
              LIMIT ?2
            )
            ORDER BY id ASC
            "#,
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let turns = rows
            .into_iter()
            .filter_map(|row| {
                let role = Role::parse(row.get::<String, _>("role").as_str())?;
                Some(Turn {
                    role,
                    content: row.get("content"),
                    created_at: row
                        .get::<String, _>("created_at")
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .collect();

        Ok(turns)
    }

    async fn clear(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM turns WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl TurnLog for Store {
    async fn append(&self, user_id: &str, role: Role, content: &str) -> Result<()> {
        match self {
            Store::Memory(store) => store.append(user_id, role, content).await,
            Store::Sqlite(store) => store.append(user_id, role, content).await,
        }
    }

    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>> {
        match self {
            Store::Memory(store) => store.history(user_id, limit).await,
            Store::Sqlite(store) => store.history(user_id, limit).await,
        }
    }

    async fn clear(&self, user_id: &str) -> Result<u64> {
        match self {
            Store::Memory(store) => store.clear(user_id).await,
            Store::Sqlite(store) => store.clear(user_id).await,
        }
    }
}
