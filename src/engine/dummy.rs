use super::{EngineSession, EngineSettings, PlayOutcome, ScenarioEngine};
use crate::scenario::Scenario;
use async_trait::async_trait;
use tokio::time::sleep;

/// DummyEngine은 브라우저 없이 동작을 로그로만 출력하는 기본 구현이다.
#[derive(Debug, Default, Clone)]
pub struct DummyEngine;

#[async_trait]
impl ScenarioEngine for DummyEngine {
    async fn launch(&self, settings: &EngineSettings) -> anyhow::Result<Box<dyn EngineSession>> {
        tracing::debug!("[DummyEngine] 세션 시작: {settings:?}");
        Ok(Box::new(DummySession))
    }
}

struct DummySession;

#[async_trait]
impl EngineSession for DummySession {
    /// 각 동작을 로그로 남기고, wait이 있으면 동작마다 대기한다.
    async fn play(&mut self, scenario: &Scenario) -> anyhow::Result<PlayOutcome> {
        for action in &scenario.actions {
            tracing::info!("[DummyEngine] 동작 실행: {}", action.kind);
            if let Some(wait) = scenario.wait {
                sleep(wait).await;
            }
        }
        Ok(PlayOutcome::Success)
    }

    async fn release(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::play_scenario;
    use crate::scenario::decode_job;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn dummy_engine_paces_each_action() {
        let scenario = decode_job(
            br#"{"_id":"A1","actions":[{"type":"GotoAction"},{"type":"ClickAction"}],"wait":500}"#,
        )
        .unwrap()
        .to_scenario();
        let started = tokio::time::Instant::now();
        let outcome = play_scenario(&DummyEngine, &EngineSettings::default(), &scenario)
            .await
            .unwrap();
        assert_eq!(outcome, PlayOutcome::Success);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1100), "{elapsed:?}");
    }
}
