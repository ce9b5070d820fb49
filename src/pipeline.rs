use crate::consumer::{Disposition, JobHandler};
use crate::engine::{EngineSettings, PlayOutcome, SharedEngine, play_scenario};
use crate::recorder::SharedRecorder;
use crate::scenario::decode_job;
use async_trait::async_trait;
use tracing::Instrument;

/// 작업 메시지 하나를 실행 결과 레코드 하나와 확인 여부로 바꾸는 파이프라인이다.
///
/// 결과가 저장된 경우에만 [`Disposition::Ack`]를 반환한다.
pub struct ScenarioPipeline {
    engine: SharedEngine,
    recorder: SharedRecorder,
    settings: EngineSettings,
}

impl ScenarioPipeline {
    /// 엔진, 저장소, 세션 설정으로 파이프라인을 구성한다.
    pub fn new(engine: SharedEngine, recorder: SharedRecorder, settings: EngineSettings) -> Self {
        Self {
            engine,
            recorder,
            settings,
        }
    }

    /// 디코딩 → 실행 → 저장 순서로 처리하고 처분을 결정한다.
    pub async fn process(&self, payload: &[u8]) -> Disposition {
        let job = match decode_job(payload) {
            Ok(job) => job,
            Err(err) => {
                tracing::error!("작업 메시지 디코딩 실패: {err}");
                return Disposition::LeavePending;
            }
        };
        let span = tracing::info_span!("job", id = %job.id);
        async {
            let scenario = job.to_scenario();
            tracing::info!("시나리오 재생을 시작합니다 ({}개 동작).", scenario.len());
            if scenario.is_empty() {
                tracing::warn!("동작이 없는 시나리오입니다.");
            }
            match scenario.wait {
                Some(wait) => tracing::info!("동작마다 {}ms 대기", wait.as_millis()),
                None => tracing::info!("동작 사이 대기 없음"),
            }
            tracing::info!("{scenario}");

            let outcome =
                match play_scenario(self.engine.as_ref(), &self.settings, &scenario).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::error!("엔진 오류로 결과를 기록하지 않습니다: {err:#}");
                        return Disposition::LeavePending;
                    }
                };
            let (success, error) = match &outcome {
                PlayOutcome::Success => {
                    tracing::info!("시나리오 성공");
                    (true, None)
                }
                PlayOutcome::Failure(reason) => {
                    tracing::warn!("시나리오 실패: {reason}");
                    (false, Some(reason.as_str()))
                }
            };

            match self.recorder.record(&job.id, success, error).await {
                Ok(record) => {
                    tracing::info!("실행 결과 저장 완료 (run {})", record.id);
                    Disposition::Ack
                }
                Err(err) => {
                    tracing::error!("실행 결과 저장 실패: {err}");
                    Disposition::LeavePending
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl JobHandler for ScenarioPipeline {
    async fn handle(&self, payload: &[u8]) -> Disposition {
        self.process(payload).await
    }
}
