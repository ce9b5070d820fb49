//! 워커 설정 모델과 로딩 로직.
//!
//! 우선순위는 기본값 → YAML 파일 → 환경 변수 → CLI 플래그 순이다.
//! YAML 본문의 `${VAR}` 플레이스홀더는 파싱 전에 환경 변수로 치환된다.

use crate::consumer::ReconnectBackoff;
use crate::engine::EngineSettings;
use crate::error::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// 브로커 호스트를 덮어쓰는 환경 변수 이름.
pub const BROKER_HOST_ENV: &str = "BROKER_HOST";
/// 저장소 호스트를 덮어쓰는 환경 변수 이름.
pub const STORE_HOST_ENV: &str = "STORE_HOST";

/// 워커 프로세스 전체 설정이다.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlayerConfig {
    /// 메시지 브로커 호스트.
    #[serde(default = "default_host")]
    pub broker_host: String,
    /// 작업을 소비할 내구성 큐 이름.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// 실행 결과 저장소 설정.
    #[serde(default)]
    pub store: StoreConfig,
    /// 브로커 재접속 지연 설정.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// 실행 엔진 설정.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            broker_host: default_host(),
            queue_name: default_queue_name(),
            store: StoreConfig::default(),
            reconnect: ReconnectConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// PostgreSQL 저장소 접속 정보이다.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_store_port")]
    pub port: u16,
    #[serde(default = "default_dbname")]
    pub dbname: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 커넥션 풀 최대 크기.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_store_port(),
            dbname: default_dbname(),
            user: None,
            password: None,
            pool_size: default_pool_size(),
        }
    }
}

impl StoreConfig {
    /// 호스트 정보로부터 접속 URL을 만든다.
    pub fn url(&self) -> String {
        format!("postgres://{}:{}/{}", self.host, self.port, self.dbname)
    }
}

/// 브로커 재접속 지연 설정이다.
///
/// `delay_ms`와 `max_delay_ms`가 같으면 고정 지연, 크면 2배씩 늘어나는 지연을 쓴다.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_reconnect_delay_ms(),
            max_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    /// 재접속 백오프 정책으로 변환한다.
    pub fn backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff::new(
            Duration::from_millis(self.delay_ms),
            Duration::from_millis(self.max_delay_ms.max(self.delay_ms)),
        )
    }
}

/// 사용할 엔진 구현 종류이다.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// 외부 브라우저 드라이버 프로세스.
    #[default]
    Process,
    /// 로그만 남기는 더미 엔진.
    Dummy,
}

/// 실행 엔진 구성이다.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,
    /// 드라이버 실행 파일.
    #[serde(default = "default_driver_program")]
    pub driver_program: String,
    /// 드라이버 고정 인자.
    #[serde(default)]
    pub driver_args: Vec<String>,
    /// 세션마다 적용할 브라우저 설정.
    #[serde(flatten)]
    pub settings: EngineSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            driver_program: default_driver_program(),
            driver_args: Vec::new(),
            settings: EngineSettings::default(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_queue_name() -> String {
    "wat_queue".to_string()
}

fn default_store_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "wat_storage".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_driver_program() -> String {
    "scenario-driver".to_string()
}

impl PlayerConfig {
    /// 브로커 접속 URL.
    pub fn broker_url(&self) -> String {
        format!("amqp://{}", self.broker_host)
    }

    /// 설정 파일(없으면 기본값)을 읽고 환경 변수 덮어쓰기를 적용한다.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Read {
                        path: path.display().to_string(),
                        source,
                    })?;
                Self::from_yaml_str(&contents, lookup)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(lookup);
        Ok(config)
    }

    /// 플레이스홀더를 치환한 뒤 YAML을 파싱한다.
    pub fn from_yaml_str(
        contents: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let expanded = expand_placeholders(contents, lookup)?;
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&expanded)?)
    }

    /// 호스트 관련 환경 변수가 있으면 덮어쓴다.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(BROKER_HOST_ENV).filter(|v| !v.is_empty()) {
            self.broker_host = host;
        }
        if let Some(host) = lookup(STORE_HOST_ENV).filter(|v| !v.is_empty()) {
            self.store.host = host;
        }
    }
}

/// `${VAR}` 패턴을 조회 함수 결과로 치환한다.
pub fn expand_placeholders(
    template: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    static PLACEHOLDER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\$\{([A-Z0-9_]+)\}").expect("정규식 컴파일 실패"));
    let mut missing: Vec<String> = Vec::new();
    let result = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        match lookup(key) {
            Some(value) => value,
            None => {
                missing.push(key.to_string());
                caps[0].to_string()
            }
        }
    });
    if !missing.is_empty() {
        return Err(ConfigError::Placeholder(missing.join(", ")));
    }
    Ok(result.into_owned())
}
