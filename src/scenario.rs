use crate::error::DecodeError;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// 엔진이 해석하는 단일 동작이다.
///
/// 워커는 `type` 태그만 읽고 나머지 필드는 그대로 엔진에 전달한다.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// 동작 종류 태그 (`GotoAction`, `ClickAction` 등).
    #[serde(rename = "type")]
    pub kind: String,
    /// 동작별 인자.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// 큐에서 수신하는 작업 메시지 모델이다.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// 작업 식별자. 실행 결과 레코드의 조인 키로 사용된다.
    #[serde(rename = "_id")]
    pub id: String,
    /// 순서가 보존되어야 하는 동작 목록.
    pub actions: Vec<Action>,
    /// 각 동작 뒤에 둘 대기 시간(ms).
    #[serde(default, deserialize_with = "deserialize_wait")]
    pub wait: Option<u64>,
}

impl Job {
    /// 0이 아닌 wait이 지정된 경우에만 동작 간 지연을 반환한다.
    pub fn pacing(&self) -> Option<Duration> {
        self.wait
            .filter(|ms| *ms != 0)
            .map(Duration::from_millis)
    }

    /// 엔진에 넘길 Scenario를 구성한다.
    pub fn to_scenario(&self) -> Scenario {
        let mut scenario = Scenario::new(self.actions.clone());
        if let Some(wait) = self.pacing() {
            scenario.add_or_update_wait(wait);
        }
        scenario
    }
}

/// 엔진이 실행하는 동작 시퀀스와 페이싱 정보이다.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    /// 실행 순서대로 정렬된 동작 목록.
    pub actions: Vec<Action>,
    /// 각 동작 뒤에 적용할 지연.
    pub wait: Option<Duration>,
}

impl Scenario {
    /// 페이싱 없이 Scenario를 생성한다.
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            actions,
            wait: None,
        }
    }

    /// 동작 간 지연을 설정하거나 교체한다.
    pub fn add_or_update_wait(&mut self, wait: Duration) {
        self.wait = Some(wait);
    }

    /// 전체 동작 수를 반환한다.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// 동작이 비었는지 여부를 확인한다.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scenario({}개 동작", self.actions.len())?;
        if let Some(wait) = self.wait {
            write!(f, ", wait={}ms", wait.as_millis())?;
        }
        write!(f, ")")?;
        for (index, action) in self.actions.iter().enumerate() {
            write!(f, "\n  {}. {}", index + 1, action.kind)?;
            if !action.params.is_empty() {
                write!(f, " {}", Value::Object(action.params.clone()))?;
            }
        }
        Ok(())
    }
}

/// 메시지 본문을 Job으로 디코딩한다.
pub fn decode_job(payload: &[u8]) -> Result<Job, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    let job: Job = serde_json::from_str(text)?;
    Ok(job)
}

/// 숫자 또는 숫자 문자열 형태의 wait 값을 모두 허용하도록 역직렬화한다.
fn deserialize_wait<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Int(u64),
        Float(f64),
        Text(String),
    }

    let millis = match Option::<Helper>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Helper::Int(value)) => return Ok(Some(value)),
        Some(Helper::Float(value)) => value,
        Some(Helper::Text(value)) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| de::Error::custom(format!("wait 값이 숫자가 아닙니다: {value}")))?
        }
    };
    if !millis.is_finite() || millis < 0.0 {
        return Err(de::Error::custom(format!(
            "wait 값은 0 이상이어야 합니다: {millis}"
        )));
    }
    Ok(Some(millis.round() as u64))
}
