use super::utils::{LastLine, pipe_forwarder};
use super::{EngineSession, EngineSettings, PlayOutcome, ScenarioEngine};
use crate::scenario::{Action, Scenario};
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// 파이프 중계 태스크가 정리되기를 기다리는 최대 시간이다.
const FORWARDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// ProcessEngine은 외부 브라우저 드라이버 프로세스로 시나리오를 실행하는 구현체이다.
///
/// 작업마다 드라이버 프로세스를 하나 띄우며, 그 프로세스가 곧 엔진 세션이다.
/// 시나리오는 stdin으로 한 줄짜리 JSON을 받고, 종료 코드 0을 성공으로 본다.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    /// 실행할 드라이버 프로그램 경로.
    program: String,
    /// 세션 설정 플래그 앞에 붙일 고정 인자.
    args: Vec<String>,
}

impl ProcessEngine {
    /// 드라이버 프로그램과 고정 인자로 엔진을 생성한다.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// 엔진 설정을 드라이버 명령행 플래그로 변환한다.
fn settings_flags(settings: &EngineSettings) -> Vec<String> {
    let mut flags = Vec::new();
    if settings.headless {
        flags.push("--headless".to_string());
    }
    flags.push("--goto-timeout-ms".to_string());
    flags.push(settings.navigation_timeout().as_millis().to_string());
    flags.push("--load-timeout-ms".to_string());
    flags.push(settings.load_timeout().as_millis().to_string());
    if settings.ignore_certificate_errors {
        flags.push("--ignore-certificate-errors".to_string());
    }
    flags
}

#[async_trait]
impl ScenarioEngine for ProcessEngine {
    async fn launch(&self, settings: &EngineSettings) -> anyhow::Result<Box<dyn EngineSession>> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).args(settings_flags(settings));
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        let mut child = command
            .spawn()
            .with_context(|| format!("드라이버 실행 실패: {}", self.program))?;

        let stderr_tail: LastLine = Arc::new(Mutex::new(None));
        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(pipe_forwarder(stdout, "STDOUT", None)));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(pipe_forwarder(
                stderr,
                "STDERR",
                Some(stderr_tail.clone()),
            )));
        }
        tracing::debug!("드라이버 세션 시작: {} (pid {:?})", self.program, child.id());
        Ok(Box::new(ProcessSession {
            child,
            stderr_tail,
            forwarders,
        }))
    }
}

/// 드라이버에 전달하는 시나리오 스크립트이다.
#[derive(Serialize)]
struct DriverScript<'a> {
    actions: &'a [Action],
    wait: Option<u64>,
}

/// 실행 중인 드라이버 프로세스 하나를 감싼다.
struct ProcessSession {
    child: Child,
    stderr_tail: LastLine,
    forwarders: Vec<JoinHandle<()>>,
}

impl ProcessSession {
    /// stderr 마지막 라인을 꺼낸다.
    fn take_failure_line(&self) -> Option<String> {
        self.stderr_tail.lock().ok().and_then(|mut guard| guard.take())
    }
}

#[async_trait]
impl EngineSession for ProcessSession {
    async fn play(&mut self, scenario: &Scenario) -> anyhow::Result<PlayOutcome> {
        let script = DriverScript {
            actions: &scenario.actions,
            wait: scenario.wait.map(|wait| wait.as_millis() as u64),
        };
        let mut body = serde_json::to_vec(&script).context("시나리오 직렬화 실패")?;
        body.push(b'\n');

        let mut stdin = self
            .child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("드라이버 stdin이 이미 닫혔습니다."))?;
        // 드라이버가 입력을 읽기 전에 죽은 경우에도 종료 코드로 판정한다.
        let write_result = stdin.write_all(&body).await;
        drop(stdin);

        let status = self.child.wait().await.context("드라이버 종료 대기 실패")?;
        for handle in self.forwarders.drain(..) {
            let _ = tokio::time::timeout(FORWARDER_DRAIN_TIMEOUT, handle).await;
        }

        if status.success() {
            write_result.context("드라이버에 시나리오 전달 실패")?;
            return Ok(PlayOutcome::Success);
        }
        let reason = self
            .take_failure_line()
            .unwrap_or_else(|| format!("드라이버 종료 코드: {status}"));
        Ok(PlayOutcome::Failure(reason))
    }

    async fn release(self: Box<Self>) -> anyhow::Result<()> {
        let mut session = *self;
        if session
            .child
            .try_wait()
            .context("드라이버 상태 조회 실패")?
            .is_none()
        {
            session.child.kill().await.context("드라이버 종료 실패")?;
        }
        for handle in session.forwarders {
            handle.abort();
        }
        Ok(())
    }
}
