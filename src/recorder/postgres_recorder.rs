use super::{OutcomeRecorder, RunRecord};
use crate::config::StoreConfig;
use crate::error::PersistError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio::sync::OnceCell;
use tokio_postgres::NoTls;

/// 실행 결과 테이블이 없으면 만든다.
const CREATE_RUN_TABLE: &str = "
CREATE TABLE IF NOT EXISTS run (
    id UUID PRIMARY KEY,
    job_id TEXT NOT NULL,
    success BOOLEAN NOT NULL,
    error TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT run_error_iff_failure CHECK (success = (error IS NULL))
);
CREATE INDEX IF NOT EXISTS run_job_id_idx ON run (job_id);
";

const INSERT_RUN: &str =
    "INSERT INTO run (id, job_id, success, error, created_at) VALUES ($1, $2, $3, $4, $5)";

/// PostgresRecorder는 PostgreSQL 연결 풀을 통해 실행 결과를 저장하는 구현체이다.
pub struct PostgresRecorder {
    /// deadpool 기반 연결 풀이다.
    pool: Pool,
    /// 스키마 준비가 끝났는지 여부.
    schema: OnceCell<()>,
}

impl PostgresRecorder {
    /// 저장소 설정으로 연결 풀을 초기화한다.
    ///
    /// 풀은 실제 접속을 첫 기록 시점까지 미루므로, 저장소가 아직 떠 있지 않아도 성공한다.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let mut pool_config = PoolConfig::new();
        pool_config.url = Some(config.url());
        pool_config.user = config.user.clone();
        pool_config.password = config.password.clone();
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pool_config.pool = Some(deadpool_postgres::PoolConfig::new(config.pool_size.max(1)));

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("PostgreSQL 커넥션 풀 생성 실패")?;
        Ok(Self {
            pool,
            schema: OnceCell::new(),
        })
    }

    /// run 테이블을 한 번만 준비한다.
    async fn ensure_schema(&self, client: &deadpool_postgres::Client) -> Result<(), PersistError> {
        self.schema
            .get_or_try_init(|| async {
                client.batch_execute(CREATE_RUN_TABLE).await?;
                tracing::info!("run 테이블 준비 완료");
                Ok::<(), PersistError>(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OutcomeRecorder for PostgresRecorder {
    /// 풀에서 커넥션을 얻어 레코드 한 건을 단일 INSERT로 저장한다.
    async fn record(
        &self,
        job_id: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<RunRecord, PersistError> {
        let client = self.pool.get().await?;
        self.ensure_schema(&client).await?;

        let record = RunRecord::new(job_id, success, error);
        let inserted = client
            .execute(
                INSERT_RUN,
                &[
                    &record.id,
                    &record.job_id,
                    &record.success,
                    &record.error,
                    &record.created_at,
                ],
            )
            .await?;
        if inserted != 1 {
            return Err(PersistError::Unexpected(format!(
                "run 레코드 INSERT 결과가 {inserted}행입니다."
            )));
        }
        tracing::debug!("run 레코드 저장: {} (job {})", record.id, record.job_id);
        Ok(record)
    }
}
