//! PostgreSQL イベントストア
//!
//! 接続はConsumer専有の1本のみ。

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::Row;
use tracing::{debug, info};
use webmon_common::config::StoreSettings;
use webmon_common::{CheckResult, StoredEvent};

use super::{redact_url, stored_event, EventStore};
use crate::error::StoreError;

const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id SERIAL PRIMARY KEY,
    url TEXT,
    status_code INTEGER,
    response_time DOUBLE PRECISION,
    response_body_regex BOOLEAN
)
"#;

const INSERT_EVENT: &str = r#"
INSERT INTO events (url, status_code, response_time, response_body_regex)
VALUES ($1, $2, $3, $4)
RETURNING id
"#;

/// PostgreSQL イベントストア
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// 設定から接続する
    ///
    /// パスワード・sslmode・CA証明書はURLより設定値を優先する。
    pub async fn connect(settings: &StoreSettings) -> Result<Self, StoreError> {
        let mut options: PgConnectOptions = settings
            .database_url
            .parse()
            .map_err(|e: sqlx::Error| StoreError::Config(e.to_string()))?;

        if let Some(password) = &settings.password {
            options = options.password(password);
        }
        if let Some(mode) = &settings.ssl_mode {
            let mode: PgSslMode = mode
                .parse()
                .map_err(|e: sqlx::Error| StoreError::Config(e.to_string()))?;
            options = options.ssl_mode(mode);
        }
        if let Some(cert) = &settings.ssl_root_cert {
            options = options.ssl_root_cert(cert);
        }

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        info!(database = %redact_url(&settings.database_url), "Connected to PostgreSQL");
        Ok(Self { pool })
    }
}

#[async_trait]
impl EventStore for PgEventStore {
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
        let id: i32 = sqlx::query_scalar(INSERT_EVENT)
            .bind(result.url())
            .bind(result.status_code().map(i32::from))
            .bind(result.response_time_seconds())
            .bind(result.body_matches_pattern())
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::Insert)?;
        tx.commit().await.map_err(StoreError::Insert)?;

        Ok(StoredEvent {
            id: i64::from(id),
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
                let id: i32 = row.try_get("id").map_err(StoreError::Query)?;
                stored_event(
                    i64::from(id),
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
