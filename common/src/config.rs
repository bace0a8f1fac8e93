//! 設定管理
//!
//! MonitorSettings等の設定構造体と、設定ファイル・シークレットファイル・
//! 環境変数を重ねて読み込むローダー。
//!
//! 優先順位（後勝ち）:
//! 1. 構造体のデフォルト値
//! 2. `settings.yaml`（`--config` 指定時はそのファイル）
//! 3. 設定ファイルと同じディレクトリの `.secrets.yaml`
//! 4. `WEBMON_` で始まる環境変数（ネストは `__` 区切り、`targets` はカンマ区切り）
//!
//! 設定ファイルとシークレットファイルは環境別セクションを持てる。
//! トップレベルに `default` / `global` / 選択中の環境名のいずれかがあれば
//! セクション形式とみなし、`default` → 環境名 → `global` の順に重ねる。
//! 他の環境のセクションは読まない。
//!
//! ```yaml
//! default:
//!   topic: health
//! production:
//!   broker:
//!     url: tls://nats.example:4222
//! ```

use std::path::{Path, PathBuf};

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, Map, Source, Value};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// 環境変数のプレフィックス
pub const ENV_PREFIX: &str = "WEBMON";

/// `--config` 未指定時に読む設定ファイル
pub const DEFAULT_SETTINGS_FILE: &str = "settings.yaml";

/// 設定ファイルと同じディレクトリから読むシークレットファイル
pub const SECRETS_FILE: &str = ".secrets.yaml";

/// 有効な環境を選ぶ環境変数
pub const ENVIRONMENT_VAR: &str = "WEBMON_ENV";

/// `WEBMON_ENV` 未設定時の環境
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// 全環境に先に適用されるセクション
pub const DEFAULT_SECTION: &str = "default";

/// 全環境に最後に適用されるセクション
pub const GLOBAL_SECTION: &str = "global";

/// 設定キーと衝突するため環境名に使えない名前
const RESERVED_ENVIRONMENTS: &[&str] = &[
    DEFAULT_SECTION,
    GLOBAL_SECTION,
    "targets",
    "body_pattern",
    "topic",
    "checker",
    "broker",
    "store",
];

/// ブラウザ相当のUser-Agent（既定のクライアント識別子を拒否するサーバー対策）
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// モニター全体の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// チェック対象URL（この順に処理する）
    #[serde(default)]
    pub targets: Vec<String>,

    /// レスポンス本文に対して評価する正規表現（未設定なら評価しない）
    #[serde(default)]
    pub body_pattern: Option<String>,

    /// ヘルスイベントを流すトピック (デフォルト: "health")
    #[serde(default = "default_topic")]
    pub topic: String,

    /// ヘルスチェッカー設定
    #[serde(default)]
    pub checker: CheckerSettings,

    /// メッセージブローカー設定
    #[serde(default)]
    pub broker: BrokerSettings,

    /// イベントストア設定
    #[serde(default)]
    pub store: StoreSettings,
}

/// ヘルスチェッカー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerSettings {
    /// リクエストタイムアウト（秒）(デフォルト: 10)
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// 送信するUser-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// 同時にチェックするターゲット数 (デフォルト: 1 = 逐次)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// メッセージブローカー（NATS JetStream）設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// サーバーURL (デフォルト: "nats://localhost:4222")
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// トピックを保持するストリーム名 (デフォルト: "WEBMON_EVENTS")
    #[serde(default = "default_stream")]
    pub stream: String,

    /// Consumerの永続コンシューマー名 (デフォルト: "webmon-persister")
    #[serde(default = "default_consumer")]
    pub consumer: String,

    /// 接続タイムアウト（秒）(デフォルト: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// nakしたメッセージを再配信するまでの待ち時間（秒）(デフォルト: 5)
    #[serde(default = "default_redelivery_delay")]
    pub redelivery_delay_secs: u64,

    /// ユーザー名
    #[serde(default)]
    pub user: Option<String>,

    /// パスワード（`.secrets.yaml` での指定を想定）
    #[serde(default)]
    pub password: Option<String>,

    /// TLS証明書ファイル
    #[serde(default)]
    pub tls: Option<TlsFiles>,
}

/// TLS証明書ファイル群
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFiles {
    /// CA証明書
    pub ca_file: PathBuf,
    /// クライアント証明書
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    /// クライアント秘密鍵
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

/// イベントストア設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// データベースURL（`postgres://` または `sqlite:`）
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// パスワード（URLに含めない場合。`.secrets.yaml` での指定を想定）
    #[serde(default)]
    pub password: Option<String>,

    /// PostgreSQLのsslmode（disable/prefer/require/verify-ca/verify-full）
    #[serde(default)]
    pub ssl_mode: Option<String>,

    /// PostgreSQLのCA証明書
    #[serde(default)]
    pub ssl_root_cert: Option<PathBuf>,

    /// 接続タイムアウト（秒）(デフォルト: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_topic() -> String {
    "health".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_max_concurrency() -> usize {
    1
}

fn default_broker_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream() -> String {
    "WEBMON_EVENTS".to_string()
}

fn default_consumer() -> String {
    "webmon-persister".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_redelivery_delay() -> u64 {
    5
}

fn default_database_url() -> String {
    "postgres://localhost:5432/webmon".to_string()
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            body_pattern: None,
            topic: default_topic(),
            checker: CheckerSettings::default(),
            broker: BrokerSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            stream: default_stream(),
            consumer: default_consumer(),
            connect_timeout_secs: default_connect_timeout(),
            redelivery_delay_secs: default_redelivery_delay(),
            user: None,
            password: None,
            tls: None,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            password: None,
            ssl_mode: None,
            ssl_root_cert: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl MonitorSettings {
    /// Publisherとして起動するための検証
    pub fn validate_for_producer(&self) -> Result<(), CommonError> {
        if self.targets.is_empty() {
            return Err(CommonError::Validation(
                "at least one target URL is required".to_string(),
            ));
        }
        for target in &self.targets {
            validate_target(target)?;
        }
        if let Some(pattern) = &self.body_pattern {
            Regex::new(pattern).map_err(|e| {
                CommonError::Validation(format!("invalid body_pattern '{}': {}", pattern, e))
            })?;
        }
        if self.checker.max_concurrency == 0 {
            return Err(CommonError::Validation(
                "checker.max_concurrency must be at least 1".to_string(),
            ));
        }
        validate_topic(&self.topic)?;
        self.broker.validate()
    }

    /// Consumerとして起動するための検証
    pub fn validate_for_consumer(&self) -> Result<(), CommonError> {
        validate_topic(&self.topic)?;
        self.broker.validate()?;
        if self.broker.consumer.trim().is_empty() {
            return Err(CommonError::Validation(
                "broker.consumer must not be empty".to_string(),
            ));
        }
        if self.broker.redelivery_delay_secs == 0 {
            return Err(CommonError::Validation(
                "broker.redelivery_delay_secs must be at least 1".to_string(),
            ));
        }
        if self.store.database_url.trim().is_empty() {
            return Err(CommonError::Validation(
                "store.database_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl BrokerSettings {
    fn validate(&self) -> Result<(), CommonError> {
        if self.url.trim().is_empty() {
            return Err(CommonError::Validation(
                "broker.url must not be empty".to_string(),
            ));
        }
        if self.stream.trim().is_empty() {
            return Err(CommonError::Validation(
                "broker.stream must not be empty".to_string(),
            ));
        }
        if let Some(tls) = &self.tls {
            if tls.cert_file.is_some() != tls.key_file.is_some() {
                return Err(CommonError::Validation(
                    "broker.tls.cert_file and broker.tls.key_file must be set together"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn validate_target(target: &str) -> Result<(), CommonError> {
    let url = url::Url::parse(target)
        .map_err(|e| CommonError::Validation(format!("invalid target URL '{}': {}", target, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CommonError::Validation(format!(
            "unsupported scheme '{}' in target URL '{}'",
            other, target
        ))),
    }
}

fn validate_topic(topic: &str) -> Result<(), CommonError> {
    if topic.is_empty() {
        return Err(CommonError::Validation("topic must not be empty".to_string()));
    }
    if topic
        .chars()
        .any(|c| c.is_whitespace() || c == '*' || c == '>')
    {
        return Err(CommonError::Validation(format!(
            "topic '{}' must not contain whitespace or wildcards",
            topic
        )));
    }
    Ok(())
}

/// 設定を読み込む
///
/// `path` を指定した場合そのファイルは必須。未指定の場合は
/// カレントディレクトリの `settings.yaml` を任意で読む。
/// 環境は `WEBMON_ENV`（未設定なら `development`）で選ぶ。
pub fn load_settings(path: Option<&Path>) -> Result<MonitorSettings, CommonError> {
    let environment =
        std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
    load_settings_for(path, &environment)
}

/// 環境を指定して設定を読み込む
pub fn load_settings_for(
    path: Option<&Path>,
    environment: &str,
) -> Result<MonitorSettings, CommonError> {
    let environment = validate_environment(environment)?;
    let (settings_path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_SETTINGS_FILE), false),
    };
    let secrets_path = settings_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(SECRETS_FILE);

    let builder = Config::builder();
    let builder = add_file_layers(builder, &settings_path, required, &environment)?;
    let builder = add_file_layers(builder, &secrets_path, false, &environment)?;
    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("targets")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

fn validate_environment(environment: &str) -> Result<String, CommonError> {
    let name = environment.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(CommonError::Validation(format!(
            "{} must not be empty",
            ENVIRONMENT_VAR
        )));
    }
    if RESERVED_ENVIRONMENTS.contains(&name.as_str()) {
        return Err(CommonError::Validation(format!(
            "'{}' cannot be used as an environment name",
            name
        )));
    }
    Ok(name)
}

/// 1つのYAMLファイルを設定レイヤーとして追加する
///
/// セクション形式なら `default` → 環境 → `global`、そうでなければファイル全体。
fn add_file_layers(
    mut builder: ConfigBuilder<DefaultState>,
    path: &Path,
    required: bool,
    environment: &str,
) -> Result<ConfigBuilder<DefaultState>, CommonError> {
    let origin = path.to_string_lossy().into_owned();
    let top = File::new(&origin, FileFormat::Yaml)
        .required(required)
        .collect()?;

    if !is_sectioned(&top, environment) {
        return Ok(builder.add_source(Layer(top)));
    }

    for section in [DEFAULT_SECTION, environment, GLOBAL_SECTION] {
        if let Some(value) = section_value(&top, section) {
            let values = value.clone().into_table().map_err(|e| {
                CommonError::Config(format!("{}: section '{}': {}", origin, section, e))
            })?;
            builder = builder.add_source(Layer(values));
        }
    }
    Ok(builder)
}

fn section_value<'a>(top: &'a Map<String, Value>, section: &str) -> Option<&'a Value> {
    top.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(section))
        .map(|(_, value)| value)
}

fn is_sectioned(top: &Map<String, Value>, environment: &str) -> bool {
    [DEFAULT_SECTION, GLOBAL_SECTION, environment]
        .iter()
        .any(|section| section_value(top, section).is_some())
}

/// 読み込み済みのキー群を設定ソースとして扱う
#[derive(Debug, Clone)]
struct Layer(Map<String, Value>);

impl Source for Layer {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        Ok(self.0.clone())
    }
}
