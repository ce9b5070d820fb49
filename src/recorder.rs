mod postgres_recorder;

pub use postgres_recorder::PostgresRecorder;

use crate::error::PersistError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// 실패 사유가 비어 있을 때 대신 기록하는 문구이다.
const UNKNOWN_FAILURE: &str = "알 수 없는 오류";

/// 작업 한 번의 실행 결과 레코드이다. 생성 후 변경되지 않는다.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    /// 새로 발급한 레코드 식별자.
    pub id: Uuid,
    /// 대상 작업 식별자.
    pub job_id: String,
    /// 실행 성공 여부.
    pub success: bool,
    /// 실패 사유. `success`가 false일 때만 존재한다.
    pub error: Option<String>,
    /// 생성 시각.
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    /// 새 식별자와 현재 시각으로 레코드를 만든다.
    ///
    /// 성공이면 실패 사유를 버리고, 실패인데 사유가 비어 있으면 기본 문구를 채운다.
    pub fn new(job_id: &str, success: bool, error: Option<&str>) -> Self {
        let error = if success {
            None
        } else {
            Some(
                error
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .unwrap_or(UNKNOWN_FAILURE)
                    .to_string(),
            )
        };
        Self {
            id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            success,
            error,
            created_at: Utc::now(),
        }
    }
}

/// 실행 결과를 영속화하는 추상 계층을 정의한다.
///
/// 저장 성공 여부만 알려주며, 메시지 확인(ack) 여부는 호출자가 결정한다.
#[async_trait]
pub trait OutcomeRecorder: Send + Sync {
    /// 결과 레코드 하나를 저장하고, 저장된 레코드를 반환한다.
    async fn record(
        &self,
        job_id: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<RunRecord, PersistError>;
}

/// OutcomeRecorder를 공유하기 위한 Arc 타입 별칭이다.
pub type SharedRecorder = Arc<dyn OutcomeRecorder>;
