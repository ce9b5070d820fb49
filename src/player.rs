use crate::config::{EngineConfig, EngineKind, PlayerConfig};
use crate::consumer::{AmqpBroker, ConnectionState, JobConsumer, MessageBroker};
use crate::engine::{DummyEngine, ProcessEngine, SharedEngine};
use crate::pipeline::ScenarioPipeline;
use crate::recorder::{PostgresRecorder, SharedRecorder};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// 소비자, 실행 엔진, 결과 저장소를 한 번에 엮은 워커이다.
pub struct Player<B: MessageBroker = AmqpBroker> {
    consumer: JobConsumer<B>,
    pipeline: ScenarioPipeline,
}

impl Player<AmqpBroker> {
    /// 설정으로부터 AMQP 브로커, PostgreSQL 저장소, 엔진을 구성한다.
    pub fn new(config: &PlayerConfig) -> anyhow::Result<Self> {
        tracing::info!(
            "새 Player 구성 (store {}) (broker {})",
            config.store.url(),
            config.broker_url()
        );
        let recorder = PostgresRecorder::new(&config.store).context("결과 저장소 구성 실패")?;
        Ok(Self::from_parts(
            AmqpBroker::new(config.broker_url()),
            config,
            build_engine(&config.engine),
            Arc::new(recorder),
        ))
    }
}

impl<B: MessageBroker> Player<B> {
    /// 이미 만들어진 구성 요소로 워커를 엮는다.
    pub fn from_parts(
        broker: B,
        config: &PlayerConfig,
        engine: SharedEngine,
        recorder: SharedRecorder,
    ) -> Self {
        let consumer = JobConsumer::new(broker, &config.queue_name, config.reconnect.backoff());
        let pipeline = ScenarioPipeline::new(engine, recorder, config.engine.settings.clone());
        Self { consumer, pipeline }
    }

    /// 브로커 연결 상태를 구독한다.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.consumer.state()
    }

    /// 종료 신호가 올 때까지 작업을 소비한다.
    pub async fn start(&self, shutdown: CancellationToken) {
        tracing::info!("Player 시작");
        self.consumer.run(&self.pipeline, shutdown).await;
    }
}

/// 설정된 종류의 실행 엔진을 만든다.
fn build_engine(config: &EngineConfig) -> SharedEngine {
    match config.kind {
        EngineKind::Process => Arc::new(ProcessEngine::new(
            config.driver_program.clone(),
            config.driver_args.clone(),
        )),
        EngineKind::Dummy => Arc::new(DummyEngine),
    }
}
