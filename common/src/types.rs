//! 共通型定義
//!
//! CheckResult, HealthEvent, StoredEvent等のコアデータ型

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, MalformedEventError};

/// 有効なHTTPステータスコードの範囲
pub const STATUS_CODE_RANGE: std::ops::RangeInclusive<u16> = 100..=599;

/// 到達できたターゲットの計測値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    status_code: u16,
    response_time_seconds: f64,
    body_matches_pattern: Option<bool>,
}

impl Measurement {
    /// 計測値を検証して作成
    ///
    /// ステータスコードは100-599、応答時間は有限の非負値でなければならない。
    pub fn new(
        status_code: u16,
        response_time_seconds: f64,
        body_matches_pattern: Option<bool>,
    ) -> Result<Self, CommonError> {
        if !STATUS_CODE_RANGE.contains(&status_code) {
            return Err(CommonError::Validation(format!(
                "status code {} is outside 100-599",
                status_code
            )));
        }
        if !response_time_seconds.is_finite() || response_time_seconds < 0.0 {
            return Err(CommonError::Validation(format!(
                "response time {} must be a non-negative finite number",
                response_time_seconds
            )));
        }
        Ok(Self {
            status_code,
            response_time_seconds,
            body_matches_pattern,
        })
    }

    /// HTTPステータスコード
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// 送信から本文受信完了までの秒数
    pub fn response_time_seconds(&self) -> f64 {
        self.response_time_seconds
    }

    /// 本文がパターンに一致したか（パターン未設定ならNone）
    pub fn body_matches_pattern(&self) -> Option<bool> {
        self.body_matches_pattern
    }
}

/// ヘルスチェック結果
///
/// `measurement` が `None` の場合はターゲットへの到達に失敗したことを表す。
/// 部分的な成功（ステータスのみ等）は型として表現できない。
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    url: String,
    measurement: Option<Measurement>,
}

impl CheckResult {
    /// 到達できたターゲットの結果を作成
    pub fn reachable(
        url: impl Into<String>,
        measurement: Measurement,
    ) -> Result<Self, CommonError> {
        Self::build(url.into(), Some(measurement))
    }

    /// 到達できなかったターゲットの結果を作成
    pub fn unreachable(url: impl Into<String>) -> Result<Self, CommonError> {
        Self::build(url.into(), None)
    }

    fn build(url: String, measurement: Option<Measurement>) -> Result<Self, CommonError> {
        if url.trim().is_empty() {
            return Err(CommonError::Validation("url must not be empty".to_string()));
        }
        Ok(Self { url, measurement })
    }

    /// チェック対象URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// 計測値（到達失敗時はNone）
    pub fn measurement(&self) -> Option<&Measurement> {
        self.measurement.as_ref()
    }

    /// 到達できたか
    pub fn is_reachable(&self) -> bool {
        self.measurement.is_some()
    }

    /// HTTPステータスコード
    pub fn status_code(&self) -> Option<u16> {
        self.measurement.map(|p| p.status_code)
    }

    /// 応答時間（秒）
    pub fn response_time_seconds(&self) -> Option<f64> {
        self.measurement.map(|p| p.response_time_seconds)
    }

    /// パターン一致結果
    pub fn body_matches_pattern(&self) -> Option<bool> {
        self.measurement.and_then(|p| p.body_matches_pattern)
    }
}

/// ヘルスイベント（ワイヤーペイロード）
///
/// 4つのキーを持つフラットなレコード。欠損値は `null` として表現される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    /// チェック対象URL
    pub url: String,
    /// HTTPステータスコード
    pub status_code: Option<u16>,
    /// 応答時間（秒）
    pub response_time: Option<f64>,
    /// 本文のパターン一致結果
    pub response_body_regex: Option<bool>,
}

impl From<&CheckResult> for HealthEvent {
    fn from(result: &CheckResult) -> Self {
        Self {
            url: result.url.clone(),
            status_code: result.status_code(),
            response_time: result.response_time_seconds(),
            response_body_regex: result.body_matches_pattern(),
        }
    }
}

impl TryFrom<HealthEvent> for CheckResult {
    type Error = MalformedEventError;

    fn try_from(event: HealthEvent) -> Result<Self, Self::Error> {
        let field_error = |e: CommonError| MalformedEventError::Field(e.to_string());

        match (event.status_code, event.response_time) {
            (Some(status_code), Some(response_time)) => {
                let measurement = Measurement::new(status_code, response_time, event.response_body_regex)
                    .map_err(field_error)?;
                CheckResult::reachable(event.url, measurement).map_err(field_error)
            }
            (None, None) => {
                if event.response_body_regex.is_some() {
                    return Err(MalformedEventError::Field(
                        "response_body_regex present on a failed check".to_string(),
                    ));
                }
                CheckResult::unreachable(event.url).map_err(field_error)
            }
            (Some(_), None) => Err(MalformedEventError::Field(
                "status_code present without response_time".to_string(),
            )),
            (None, Some(_)) => Err(MalformedEventError::Field(
                "response_time present without status_code".to_string(),
            )),
        }
    }
}

/// 永続化済みイベント
///
/// ストアが挿入時に採番した `id` を持つ。作成後は変更されない。
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// ストア採番ID
    pub id: i64,
    /// 保存されたチェック結果
    pub result: CheckResult,
}
