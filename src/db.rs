//! Observation storage.
//!
//! [`RecordStore`] is the append-only interface the scanning loops and the
//! results view share. [`SqliteStore`] is the persistent implementation and
//! carries the schema migrations; [`MemoryStore`] keeps everything in a vector
//! for tests and throwaway runs.

use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{
    query, query_as, query_scalar,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tokio::sync::RwLock;

use crate::{error::Result, model::Observation};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, observation: &Observation) -> Result<()>;

    /// Location keys in the order they were first recorded.
    async fn distinct_locations(&self) -> Result<Vec<String>>;

    async fn by_location(&self, location_key: &str) -> Result<Vec<Observation>>;

    /// Removes every observation, returning how many were deleted.
    async fn clear_all(&self) -> Result<u64>;

    async fn all(&self) -> Result<Vec<Observation>>;
}

#[derive(sqlx::FromRow)]
struct ObservationRow {
    access_point_id: String,
    display_name: Option<String>,
    signal_strength: i32,
    captured_at: i64,
    location_key: Option<String>,
    location_label: Option<String>,
}

impl From<ObservationRow> for Observation {
    fn from(row: ObservationRow) -> Self {
        Observation {
            access_point_id: row.access_point_id,
            display_name: row.display_name,
            signal_strength: row.signal_strength,
            captured_at: DateTime::from_timestamp_millis(row.captured_at).unwrap_or_default(),
            location_key: row.location_key,
            location_label: row.location_label,
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url {url}"))?
            .create_if_missing(true);

        // a single long-lived connection keeps `sqlite::memory:` databases alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open database")?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, bringing its schema up to date first.
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::migrate!()
            .run(&pool)
            .await
            .context("Failed to migrate database")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, observation: &Observation) -> Result<()> {
        query("insert into observation (access_point_id, display_name, signal_strength, captured_at, location_key, location_label) values (?, ?, ?, ?, ?, ?)")
            .bind(&observation.access_point_id)
            .bind(&observation.display_name)
            .bind(observation.signal_strength)
            .bind(observation.captured_at.timestamp_millis())
            .bind(&observation.location_key)
            .bind(&observation.location_label)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn distinct_locations(&self) -> Result<Vec<String>> {
        let keys = query_scalar::<_, String>(
            "select location_key from observation where location_key is not null group by location_key order by min(id)",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn by_location(&self, location_key: &str) -> Result<Vec<Observation>> {
        let rows: Vec<ObservationRow> = query_as("select access_point_id, display_name, signal_strength, captured_at, location_key, location_label from observation where location_key = ? order by id")
            .bind(location_key)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn clear_all(&self) -> Result<u64> {
        let result = query("delete from observation").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn all(&self) -> Result<Vec<Observation>> {
        let rows: Vec<ObservationRow> = query_as("select access_point_id, display_name, signal_strength, captured_at, location_key, location_label from observation order by id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<Observation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, observation: &Observation) -> Result<()> {
        self.records.write().await.push(observation.clone());
        Ok(())
    }

    async fn distinct_locations(&self) -> Result<Vec<String>> {
        let records = self.records.read().await;
        let mut keys: Vec<String> = Vec::new();
        for key in records.iter().filter_map(|x| x.location_key.as_ref()) {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }

    async fn by_location(&self, location_key: &str) -> Result<Vec<Observation>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|x| x.location_key.as_deref() == Some(location_key))
            .cloned()
            .collect())
    }

    async fn clear_all(&self) -> Result<u64> {
        let mut records = self.records.write().await;
        let count = records.len() as u64;
        records.clear();
        Ok(count)
    }

    async fn all(&self) -> Result<Vec<Observation>> {
        Ok(self.records.read().await.clone())
    }
}
