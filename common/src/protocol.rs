//! 通信プロトコル定義
//!
//! Publisher↔Consumer間で受け渡すヘルスイベントのエンコード/デコード。
//! ペイロードはJSONオブジェクトで、スキーマレジストリなしに両プロセスで読める。

use serde_json::json;

use crate::error::MalformedEventError;
use crate::types::{CheckResult, HealthEvent};

/// ペイロードのコーデックバージョン
///
/// フィールド構成を変える場合はこの値を上げ、新旧両方をデコードできるようにすること。
/// バージョン1のペイロードは `version` キーを持たない（キーがなければ1とみなす）。
pub const CODEC_VERSION: u64 = 1;

/// バージョンを示すキー（バージョン2以降のペイロードで必須）
pub const VERSION_KEY: &str = "version";

/// チェック結果をペイロードにエンコード
///
/// 純粋関数。キー順序は固定（辞書順）のため同じ入力からは常に同じバイト列になる。
pub fn encode(result: &CheckResult) -> Vec<u8> {
    let event = HealthEvent::from(result);
    json!({
        "url": event.url,
        "status_code": event.status_code,
        "response_time": event.response_time,
        "response_body_regex": event.response_body_regex,
    })
    .to_string()
    .into_bytes()
}

/// ペイロードをチェック結果にデコード
///
/// JSONとして不正、型不一致、不変条件違反のいずれも `MalformedEventError` となる。
pub fn decode(payload: &[u8]) -> Result<CheckResult, MalformedEventError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    // serdeの構造体デシリアライズは配列も受け付けるため、オブジェクトに限定する
    if !value.is_object() {
        return Err(MalformedEventError::Field(
            "payload is not a JSON object".to_string(),
        ));
    }
    let version = payload_version(&value)?;
    if version != CODEC_VERSION {
        return Err(MalformedEventError::Field(format!(
            "unsupported codec version {} (supported: {})",
            version, CODEC_VERSION
        )));
    }
    let event: HealthEvent = serde_json::from_value(value)?;
    CheckResult::try_from(event)
}

fn payload_version(value: &serde_json::Value) -> Result<u64, MalformedEventError> {
    match value.get(VERSION_KEY) {
        None => Ok(CODEC_VERSION),
        Some(v) => v.as_u64().ok_or_else(|| {
            MalformedEventError::Field(format!("{} must be a non-negative integer", VERSION_KEY))
        }),
    }
}
