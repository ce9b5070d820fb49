mod dummy;
mod process;
mod utils;

pub use dummy::DummyEngine;
pub use process::ProcessEngine;

use crate::scenario::Scenario;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// 시나리오 실행 결과를 표현한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// 모든 동작이 완료되었다.
    Success,
    /// 엔진이 보고한 실패 사유와 함께 실패.
    Failure(String),
}

/// 작업마다 엔진 세션을 띄울 때 적용하는 설정이다.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EngineSettings {
    /// 화면 없이 실행할지 여부.
    #[serde(default = "default_true")]
    pub headless: bool,
    /// 페이지 이동 제한 시간(ms).
    #[serde(default = "default_timeout_ms")]
    pub navigation_timeout_ms: u64,
    /// 페이지 로드 제한 시간(ms).
    #[serde(default = "default_timeout_ms")]
    pub load_timeout_ms: u64,
    /// TLS 인증서 오류를 무시할지 여부.
    #[serde(default = "default_true")]
    pub ignore_certificate_errors: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            headless: true,
            navigation_timeout_ms: default_timeout_ms(),
            load_timeout_ms: default_timeout_ms(),
            ignore_certificate_errors: true,
        }
    }
}

impl EngineSettings {
    /// 페이지 이동 제한 시간.
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    /// 페이지 로드 제한 시간.
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// 시나리오 실행 엔진의 추상 계층을 정의한다.
#[async_trait]
pub trait ScenarioEngine: Send + Sync {
    /// 새 실행 환경(브라우저 세션)을 띄운다.
    async fn launch(&self, settings: &EngineSettings) -> anyhow::Result<Box<dyn EngineSession>>;
}

/// 한 작업 동안만 유지되는 엔진 세션이다.
#[async_trait]
pub trait EngineSession: Send {
    /// 동작 목록을 순서대로 실행한다.
    ///
    /// 시나리오 수준의 실패는 `Ok(PlayOutcome::Failure)`로, 엔진 자체의 예기치 못한
    /// 오류는 `Err`로 반환한다.
    async fn play(&mut self, scenario: &Scenario) -> anyhow::Result<PlayOutcome>;

    /// 세션 자원을 해제한다.
    async fn release(self: Box<Self>) -> anyhow::Result<()>;
}

/// ScenarioEngine을 공유하기 위한 Arc 타입 별칭이다.
pub type SharedEngine = Arc<dyn ScenarioEngine>;

/// 세션을 띄워 시나리오를 실행하고, 결과와 무관하게 세션을 해제한다.
pub async fn play_scenario(
    engine: &dyn ScenarioEngine,
    settings: &EngineSettings,
    scenario: &Scenario,
) -> anyhow::Result<PlayOutcome> {
    let mut session = engine
        .launch(settings)
        .await
        .context("엔진 세션 시작 실패")?;
    let result = session.play(scenario).await;
    if let Err(err) = session.release().await {
        tracing::warn!("엔진 세션 해제 실패: {err:#}");
    }
    result
}
