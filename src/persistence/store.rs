//! SQLite-based persistence store
//!
//! Build and agent records are stored as JSON documents next to a few
//! queryable columns. Every build write also appends a row to
//! `build_changes` inside the same transaction; feeds tail that table.
//! Change rows older than the retention window are pruned on every write,
//! so a feed that falls further behind than the window misses them.

use crate::core::state::{AgentRecord, Build, BuildChange};
use crate::persistence::{BuildFeed, Store, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_CHANGE_RETENTION: Duration = Duration::from_secs(3600);

/// SQLite build and agent store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    poll_interval: Duration,
    change_retention: Duration,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite://piper.db` or `sqlite::memory:`),
    /// creating the database file when missing
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to `:memory:` opens its own database
        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        let store = Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
            change_retention: DEFAULT_CHANGE_RETENTION,
        };
        store.init().await?;

        debug!("Connected to {}", url);
        Ok(store)
    }

    /// How often feeds look for new change rows
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long change rows are kept for feeds to read
    pub fn with_change_retention(mut self, retention: Duration) -> Self {
        self.change_retention = retention;
        self
    }

    /// Delete change rows recorded more than `older_than` ago; returns how
    /// many were removed
    pub async fn prune_changes(&self, older_than: Duration) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = Self::delete_changes_before(&mut tx, cutoff(older_than)).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_changes_before(
        tx: &mut Transaction<'_, Sqlite>,
        cutoff: i64,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM build_changes WHERE recorded < ?1")
            .bind(cutoff)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() > 0 {
            debug!("Pruned {} build change rows", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    /// Initialize database schema
    async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS builds (
                id TEXT PRIMARY KEY,
                agent TEXT,
                status TEXT,
                success INTEGER,
                data TEXT NOT NULL,
                updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                fqdn TEXT NOT NULL,
                building TEXT,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS build_changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                build_id TEXT NOT NULL,
                old_value TEXT,
                new_value TEXT,
                recorded INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_build_changes_recorded ON build_changes(recorded);

            CREATE INDEX IF NOT EXISTS idx_builds_agent ON builds(agent);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_build(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT data FROM builds WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|row| row.get::<String, _>("data")))
    }

    /// Append a change row and drop the ones past the retention window
    async fn record_change(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<(), StoreError> {
        Self::delete_changes_before(tx, cutoff(self.change_retention)).await?;

        sqlx::query(
            "INSERT INTO build_changes (build_id, old_value, new_value, recorded) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id)
        .bind(old_value)
        .bind(new_value)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn write_build(
        tx: &mut Transaction<'_, Sqlite>,
        build: &Build,
        id: &str,
    ) -> Result<String, StoreError> {
        let data = serde_json::to_string(build)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO builds (id, agent, status, success, data, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(id)
        .bind(build.agent.as_deref())
        .bind(build.status.as_deref())
        .bind(build.success)
        .bind(&data)
        .bind(build.updated.unwrap_or_else(Utc::now).to_rfc3339())
        .execute(&mut **tx)
        .await?;
        Ok(data)
    }

    /// Remove a build, announcing it as a change without a new value
    pub async fn delete_build(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let old = Self::load_build(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "build",
                id: id.to_string(),
            })?;

        sqlx::query("DELETE FROM builds WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        self.record_change(&mut tx, id, Some(&old), None).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn head(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS head FROM build_changes")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("head"))
    }

    /// Change rows after `seq`, oldest first
    async fn changes_after(&self, seq: i64) -> Result<Vec<(i64, BuildChange)>, StoreError> {
        let rows = sqlx::query(
            "SELECT seq, old_value, new_value FROM build_changes WHERE seq > ?1 ORDER BY seq ASC",
        )
        .bind(seq)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let old_value = decode(row.get::<Option<String>, _>("old_value"))?;
                let new_value = decode(row.get::<Option<String>, _>("new_value"))?;
                Ok((
                    row.get::<i64, _>("seq"),
                    BuildChange {
                        old_value,
                        new_value,
                    },
                ))
            })
            .collect()
    }
}

/// Millisecond timestamp `age` before now
fn cutoff(age: Duration) -> i64 {
    let age = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_sub(age)
}

fn decode(data: Option<String>) -> Result<Option<Build>, StoreError> {
    data.map(|data| serde_json::from_str(&data))
        .transpose()
        .map_err(StoreError::from)
}

#[async_trait]
impl Store for SqliteStore {
    async fn add_build(&self, build: &Build) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut record = build.clone();
        record.id = Some(id.clone());
        record.updated = Some(Utc::now());

        let mut tx = self.pool.begin().await?;
        let data = Self::write_build(&mut tx, &record, &id).await?;
        self.record_change(&mut tx, &id, None, Some(&data)).await?;
        tx.commit().await?;

        Ok(id)
    }

    async fn update_build(&self, build: &Build) -> Result<(), StoreError> {
        let id = build.id.clone().ok_or(StoreError::MissingId)?;
        let mut record = build.clone();
        record.updated = Some(Utc::now());

        let mut tx = self.pool.begin().await?;
        let old = Self::load_build(&mut tx, &id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "build",
                id: id.clone(),
            })?;
        let data = Self::write_build(&mut tx, &record, &id).await?;
        self.record_change(&mut tx, &id, Some(&old), Some(&data)).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn get_build(&self, id: &str) -> Result<Option<Build>, StoreError> {
        let row = sqlx::query("SELECT data FROM builds WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        decode(row.map(|row| row.get::<String, _>("data")))
    }

    async fn build_feed(&self) -> Result<BuildFeed, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut last = self.head().await?;
        let store = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(store.poll_interval);
            loop {
                interval.tick().await;
                if tx.is_closed() {
                    break;
                }

                let changes = match store.changes_after(last).await {
                    Ok(changes) => changes,
                    Err(e) => {
                        warn!("Build feed stopped: {}", e);
                        break;
                    }
                };

                for (seq, change) in changes {
                    last = seq;
                    if tx.send(change).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(BuildFeed::new(rx))
    }

    async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>, StoreError> {
        let row = sqlx::query("SELECT data FROM agents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>("data"))?)),
            None => Ok(None),
        }
    }

    async fn add_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO agents (id, fqdn, building, data) VALUES (?1, ?2, ?3, ?4)")
            .bind(&agent.id)
            .bind(&agent.fqdn)
            .bind(agent.building.as_deref())
            .bind(serde_json::to_string(agent)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE agents SET fqdn = ?2, building = ?3, data = ?4 WHERE id = ?1")
            .bind(&agent.id)
            .bind(&agent.fqdn)
            .bind(agent.building.as_deref())
            .bind(serde_json::to_string(agent)?)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "agent",
                id: agent.id.clone(),
            });
        }
        Ok(())
    }
}
