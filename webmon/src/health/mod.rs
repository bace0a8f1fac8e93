//! ヘルスチェック
//!
//! ターゲットURLへ1回だけGETを送り、到達可否・ステータス・応答時間・
//! 本文のパターン一致を計測する。到達失敗はエラーとして伝播させず、
//! 全フィールド欠損の結果として記録する。

pub mod checker;

pub use checker::HealthChecker;
