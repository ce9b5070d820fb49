/// 브로커 연결, 채널, 큐 구성 중 발생하는 오류를 표현한다.
///
/// 이 오류는 로그로만 남고 재접속 루프가 흡수한다.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// AMQP 프로토콜 계층에서 올라온 오류이다.
    #[error("AMQP 오류: {0}")]
    Amqp(#[from] lapin::Error),
    /// 소비자 스트림이나 채널이 닫힌 경우이다.
    #[error("브로커 세션이 종료되었습니다: {0}")]
    Closed(String),
}

/// 작업 메시지를 Job 모델로 해석하지 못한 경우이다.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// 본문이 UTF-8이 아니다.
    #[error("메시지 본문이 UTF-8이 아닙니다: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// JSON 구조가 Job 모델과 맞지 않는다.
    #[error("Job JSON 파싱 실패: {0}")]
    Json(#[from] serde_json::Error),
}

/// 실행 결과 레코드 저장 실패를 표현한다.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// 연결 풀에서 커넥션을 얻지 못했다.
    #[error("저장소 커넥션 획득 실패: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    /// 테이블 생성 또는 INSERT 실행이 실패했다.
    #[error("저장소 쿼리 실패: {0}")]
    Query(#[from] tokio_postgres::Error),
    /// 저장 결과가 기대와 다르다.
    #[error("저장 실패: {0}")]
    Unexpected(String),
}

/// 설정 파일 로딩 중 발생하는 오류이다.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 읽지 못했다.
    #[error("설정 파일을 읽을 수 없습니다: {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// YAML 구조 오류이다.
    #[error("설정 YAML 파싱 실패: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// `${VAR}` 플레이스홀더에 대응하는 환경 변수가 없다.
    #[error("플레이스홀더 치환 실패: {0}")]
    Placeholder(String),
}
