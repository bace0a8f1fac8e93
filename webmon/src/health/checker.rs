//! ターゲットヘルスチェッカー
//!
//! ブラウザ相当のUser-Agentで1回GETし、送信から本文受信完了までを計測する。

use std::time::{Duration, Instant};

use bytes::Bytes;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, info, warn};
use webmon_common::config::CheckerSettings;
use webmon_common::{CheckResult, CommonError, Measurement};

use crate::error::TransportError;

/// ヘルスチェッカー
///
/// HTTPクライアントとコンパイル済みパターンを保持する。クローンは安価。
#[derive(Clone, Debug)]
pub struct HealthChecker {
    /// HTTPクライアント（タイムアウト・User-Agent設定済み）
    client: Client,
    /// 本文に対して評価するパターン
    pattern: Option<Regex>,
}

/// 1回のGETで得た生の応答
struct Fetched {
    status: u16,
    body: Bytes,
    elapsed: Duration,
}

impl HealthChecker {
    /// 設定からヘルスチェッカーを作成
    pub fn new(settings: &CheckerSettings, body_pattern: Option<&str>) -> Result<Self, CommonError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| CommonError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let pattern = body_pattern
            .map(Regex::new)
            .transpose()
            .map_err(|e| CommonError::Validation(format!("Invalid body pattern: {}", e)))?;

        Ok(Self { client, pattern })
    }

    /// パターンが設定されているか
    pub fn has_pattern(&self) -> bool {
        self.pattern.is_some()
    }

    /// ターゲットをチェック
    ///
    /// 到達失敗はここで回復し、全フィールド欠損の結果を返す。
    /// `Err` になるのはURLが空の場合のみ。
    pub async fn check(&self, url: &str) -> Result<CheckResult, CommonError> {
        let fetched = match self.fetch(url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(url = %url, error = %e.source, "Target unreachable");
                return CheckResult::unreachable(url);
            }
        };

        let response_time = fetched.elapsed.as_secs_f64();
        info!(url = %url, status_code = fetched.status, "Target responded");
        info!(url = %url, response_time = response_time, "Target response time");

        let body_matches = self.pattern.as_ref().map(|re| {
            let matched = re.is_match(&decode_latin1(&fetched.body));
            debug!(url = %url, matched = matched, "Body pattern evaluated");
            matched
        });

        match Measurement::new(fetched.status, response_time, body_matches) {
            Ok(measurement) => CheckResult::reachable(url, measurement),
            Err(e) => {
                warn!(url = %url, error = %e, "Discarding unusable response");
                CheckResult::unreachable(url)
            }
        }
    }

    /// GETを1回送り、本文を最後まで受信する
    async fn fetch(&self, url: &str) -> Result<Fetched, TransportError> {
        let transport = |source: reqwest::Error| TransportError {
            url: url.to_string(),
            source,
        };

        let start = Instant::now();
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport)?;
        let elapsed = start.elapsed();

        Ok(Fetched {
            status,
            body,
            elapsed,
        })
    }
}

/// ISO-8859-1としてデコード
///
/// 各バイトを同じ値のコードポイントに写すため、任意のバイト列で失敗しない。
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> CheckerSettings {
        CheckerSettings {
            timeout_secs: 2,
            ..CheckerSettings::default()
        }
    }

    #[test]
    fn test_decode_latin1_never_fails() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let text = decode_latin1(&bytes);

        assert_eq!(text.chars().count(), 256);
        assert_eq!(text.chars().nth(0xE9), Some('é'));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = HealthChecker::new(&settings(), Some("(unclosed"));
        assert!(matches!(result, Err(CommonError::Validation(_))));
    }

    #[tokio::test]
    async fn test_check_reachable_target() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&mock)
            .await;

        let checker = HealthChecker::new(&settings(), None).unwrap();
        let url = format!("{}/", mock.uri());
        let result = checker.check(&url).await.unwrap();

        assert_eq!(result.url(), url);
        assert_eq!(result.status_code(), Some(200));
        assert!(result.response_time_seconds().unwrap() >= 0.0);
        assert_eq!(result.body_matches_pattern(), None);
    }

    #[tokio::test]
    async fn test_check_records_error_status() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock)
            .await;

        let checker = HealthChecker::new(&settings(), None).unwrap();
        let result = checker.check(&mock.uri()).await.unwrap();

        // HTTPエラーも到達はしているので計測値として記録される
        assert_eq!(result.status_code(), Some(503));
        assert!(result.is_reachable());
    }

    #[tokio::test]
    async fn test_check_sends_browser_user_agent() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock)
            .await;

        let checker = HealthChecker::new(&settings(), None).unwrap();
        let result = checker.check(&mock.uri()).await.unwrap();

        assert_eq!(result.status_code(), Some(204));
        // header() マッチャーはカンマで値を分割するため、受信値を直接比較する
        let requests = mock.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let user_agent = requests[0].headers.get("user-agent").unwrap();
        assert_eq!(
            user_agent.to_str().unwrap(),
            webmon_common::config::DEFAULT_USER_AGENT
        );
    }

    #[tokio::test]
    async fn test_check_body_pattern() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/match"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Welcome home</h1>"))
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/latin1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x43, 0x61, 0x66, 0xE9]))
            .mount(&mock)
            .await;

        let checker = HealthChecker::new(&settings(), Some(r"Welcome\s+\w+")).unwrap();
        let matched = checker.check(&format!("{}/match", mock.uri())).await.unwrap();
        assert_eq!(matched.body_matches_pattern(), Some(true));

        // UTF-8として不正な本文でもデコードに失敗しない
        let unmatched = checker.check(&format!("{}/latin1", mock.uri())).await.unwrap();
        assert_eq!(unmatched.status_code(), Some(200));
        assert_eq!(unmatched.body_matches_pattern(), Some(false));

        let cafe = HealthChecker::new(&settings(), Some("Café")).unwrap();
        let result = cafe.check(&format!("{}/latin1", mock.uri())).await.unwrap();
        assert_eq!(result.body_matches_pattern(), Some(true));
    }

    #[tokio::test]
    async fn test_check_unreachable_target() {
        // 一度確保して解放したポートは接続拒否になる
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}/", listener.local_addr().unwrap())
        };

        let checker = HealthChecker::new(&settings(), Some("anything")).unwrap();
        let result = checker.check(&addr).await.unwrap();

        assert!(!result.is_reachable());
        assert_eq!(result.status_code(), None);
        assert_eq!(result.response_time_seconds(), None);
        assert_eq!(result.body_matches_pattern(), None);
    }

    #[tokio::test]
    async fn test_check_timeout_is_unreachable() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&mock)
            .await;

        let checker = HealthChecker::new(
            &CheckerSettings {
                timeout_secs: 1,
                ..CheckerSettings::default()
            },
            None,
        )
        .unwrap();
        let result = checker.check(&mock.uri()).await.unwrap();

        assert!(!result.is_reachable());
    }
}
