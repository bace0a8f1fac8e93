//! 環境変数ヘルパー
//!
//! 設定ファイルを経由しない実行時オプション（ログ出力先など）を読む。
//! 旧名の変数にフォールバックし、その場合は非推奨の警告を出す。

/// 環境変数を旧名へのフォールバック付きで取得
///
/// 新しい名前が設定されていればその値、旧名のみ設定されていれば警告を出して
/// その値を返す。どちらもなければ `None`。
///
/// # Example
/// ```
/// use webmon::config::get_env_with_fallback;
///
/// let level = get_env_with_fallback("WEBMON_LOG_LEVEL", "LOG_LEVEL");
/// ```
pub fn get_env_with_fallback(new_name: &str, old_name: &str) -> Option<String> {
    if let Ok(val) = std::env::var(new_name) {
        return Some(val);
    }
    if let Ok(val) = std::env::var(old_name) {
        tracing::warn!(
            "Environment variable '{}' is deprecated, use '{}' instead",
            old_name,
            new_name
        );
        return Some(val);
    }
    None
}

/// 環境変数をフォールバック付きで取得して型変換
///
/// 未設定・変換失敗のいずれもデフォルト値になる。
pub fn get_env_with_fallback_parse<T: std::str::FromStr>(
    new_name: &str,
    old_name: &str,
    default: T,
) -> T {
    get_env_with_fallback(new_name, old_name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// ログレベル（`WEBMON_LOG_LEVEL`、旧: `LOG_LEVEL`）
pub fn log_level() -> Option<String> {
    get_env_with_fallback("WEBMON_LOG_LEVEL", "LOG_LEVEL")
}

/// ログファイルの出力先ディレクトリ（`WEBMON_LOG_DIR`、旧: `LOG_DIR`）
pub fn log_dir() -> Option<std::path::PathBuf> {
    get_env_with_fallback("WEBMON_LOG_DIR", "LOG_DIR").map(std::path::PathBuf::from)
}

/// 定期実行の間隔（秒）（`WEBMON_INTERVAL_SECS`、旧: `INTERVAL_SECS`）
///
/// 0 は単発実行を表す。
pub fn interval_secs() -> u64 {
    get_env_with_fallback_parse("WEBMON_INTERVAL_SECS", "INTERVAL_SECS", 0u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear(names: &[&str]) {
        for name in names {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_new_name_takes_precedence() {
        std::env::set_var("WEBMON_TEST_NEW", "new");
        std::env::set_var("WEBMON_TEST_OLD", "old");

        assert_eq!(
            get_env_with_fallback("WEBMON_TEST_NEW", "WEBMON_TEST_OLD"),
            Some("new".to_string())
        );

        clear(&["WEBMON_TEST_NEW", "WEBMON_TEST_OLD"]);
    }

    #[test]
    #[serial]
    fn test_falls_back_to_old_name() {
        clear(&["WEBMON_TEST_NEW"]);
        std::env::set_var("WEBMON_TEST_OLD", "old");

        assert_eq!(
            get_env_with_fallback("WEBMON_TEST_NEW", "WEBMON_TEST_OLD"),
            Some("old".to_string())
        );

        clear(&["WEBMON_TEST_OLD"]);
        assert_eq!(get_env_with_fallback("WEBMON_TEST_NEW", "WEBMON_TEST_OLD"), None);
    }

    #[test]
    #[serial]
    fn test_parse_uses_default_on_invalid_value() {
        std::env::set_var("WEBMON_INTERVAL_SECS", "soon");
        assert_eq!(interval_secs(), 0);

        std::env::set_var("WEBMON_INTERVAL_SECS", "30");
        assert_eq!(interval_secs(), 30);

        clear(&["WEBMON_INTERVAL_SECS", "INTERVAL_SECS"]);
        assert_eq!(interval_secs(), 0);
    }
}
