//! データベースアクセス層
//!
//! ヘルスイベントを `events` テーブルへ永続化する。本番はPostgreSQL、
//! ローカル実行・テストはSQLite。

/// PostgreSQLストア
pub mod postgres;

/// SQLiteストア
pub mod sqlite;

use async_trait::async_trait;
use url::Url;
use webmon_common::config::StoreSettings;
use webmon_common::{CheckResult, HealthEvent, StoredEvent};

use crate::error::StoreError;

pub use postgres::PgEventStore;
pub use sqlite::SqliteEventStore;

/// イベントストア
#[async_trait]
pub trait EventStore: Send + Sync {
    /// `events` テーブルを作成（既存なら何もしない）
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// 1件挿入してコミットする
    ///
    /// 戻り値はコミット済みの行。
    async fn insert_event(&self, result: &CheckResult) -> Result<StoredEvent, StoreError>;

    /// 保存済みイベントをID順に取得
    async fn list_events(&self) -> Result<Vec<StoredEvent>, StoreError>;

    /// 接続を閉じる
    async fn close(&self);
}

/// URLのスキームからバックエンドを選んで接続する
pub async fn connect_store(settings: &StoreSettings) -> Result<Box<dyn EventStore>, StoreError> {
    let url = settings.database_url.as_str();
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(Box::new(PgEventStore::connect(settings).await?))
    } else if url.starts_with("sqlite:") {
        Ok(Box::new(SqliteEventStore::connect(settings).await?))
    } else {
        Err(StoreError::Config(format!(
            "unsupported database URL scheme: {}",
            redact_url(url)
        )))
    }
}

/// DB行（url, status_code, response_time, response_body_regex）からの復元
fn stored_event(
    id: i64,
    url: String,
    status_code: Option<i32>,
    response_time: Option<f64>,
    response_body_regex: Option<bool>,
) -> Result<StoredEvent, StoreError> {
    let status_code = status_code
        .map(u16::try_from)
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("row {}: status_code {}", id, e)))?;
    let event = HealthEvent {
        url,
        status_code,
        response_time,
        response_body_regex,
    };
    let result = CheckResult::try_from(event)
        .map_err(|e| StoreError::Corrupt(format!("row {}: {}", id, e)))?;
    Ok(StoredEvent { id, result })
}

/// ログ用にURLのユーザー情報を伏せる
///
/// 解釈できないURLは資格情報を含みうるため、そのまま出さない。
pub(crate) fn redact_url(raw: &str) -> String {
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return "<unparseable database URL>".to_string(),
    };
    if !url.username().is_empty() || url.password().is_some() {
        // ベースURLを持てない形式（`sqlite::memory:` など）にユーザー情報はない
        let _ = url.set_password(None);
        let _ = url.set_username("***");
    }
    url.to_string()
}
