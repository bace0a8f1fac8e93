//! SQLite イベントストア
//!
//! ローカル実行・テスト用。`sqlite::memory:` は接続ごとに別DBになるため
//! 接続数は1に固定する。

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use webmon_common::config::StoreSettings;
use webmon_common::{CheckResult, StoredEvent};

use super::{stored_event, EventStore};
use crate::error::StoreError;

const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT,
    status_code INTEGER,
    response_time REAL,
    response_body_regex BOOLEAN
)
"#;

const INSERT_EVENT: &str = r#"
INSERT INTO events (url, status_code, response_time, response_body_regex)
VALUES (?, ?, ?, ?)
RETURNING id
"#;

/// SQLite イベントストア
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    /// 設定から接続する（ファイルがなければ作成）
    pub async fn connect(settings: &StoreSettings) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&settings.database_url)
            .map_err(|e| StoreError::Config(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        info!(database = %settings.database_url, "Connected to SQLite");
        Ok(Self { pool })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_EVENTS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Schema)?;
        debug!("Events table ready");
        Ok(())
    }

    async fn insert_event(&self, result: &CheckResult) -> Result<StoredEvent, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Insert)?;
        let id: i64 = sqlx::query_scalar(INSERT_EVENT)
            .bind(result.url())
            .bind(result.status_code().map(i32::from))
            .bind(result.response_time_seconds())
            .bind(result.body_matches_pattern())
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::Insert)?;
        tx.commit().await.map_err(StoreError::Insert)?;

        Ok(StoredEvent {
            id,
            result: result.clone(),
        })
    }

    async fn list_events(&self) -> Result<Vec<StoredEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, url, status_code, response_time, response_body_regex FROM events ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        rows.iter()
            .map(|row| {
                stored_event(
                    row.try_get("id").map_err(StoreError::Query)?,
                    row.try_get::<Option<String>, _>("url")
                        .map_err(StoreError::Query)?
                        .unwrap_or_default(),
                    row.try_get("status_code").map_err(StoreError::Query)?,
                    row.try_get("response_time").map_err(StoreError::Query)?,
                    row.try_get("response_body_regex").map_err(StoreError::Query)?,
                )
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
