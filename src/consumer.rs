mod amqp;

pub use amqp::AmqpBroker;

use crate::error::ConnectionError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// 브로커 연결의 현재 상태이다. 소비자만 갱신한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 연결이 없다.
    Disconnected,
    /// 연결, 채널, 큐 구성을 시도하는 중.
    Connecting,
    /// 구독이 살아 있다.
    Connected,
}

/// 처리 파이프라인이 내린 메시지 처분이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 결과가 저장되었으므로 확인(ack)한다.
    Ack,
    /// 확인하지 않고 남겨 두어 재전달을 기다린다.
    LeavePending,
}

/// 수신한 작업 메시지 하나를 처리하는 핸들러이다.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// 메시지 본문을 처리하고 처분을 결정한다.
    async fn handle(&self, payload: &[u8]) -> Disposition;
}

/// 브로커에 접속해 큐 구독을 여는 추상 계층이다.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    type Subscription: Subscription;

    /// 연결, 확인 채널, 내구성 큐 선언, prefetch=1 설정, 소비 시작까지 수행한다.
    async fn subscribe(&self, queue: &str) -> Result<Self::Subscription, ConnectionError>;
}

/// 살아 있는 구독 하나를 표현한다.
#[async_trait]
pub trait Subscription: Send {
    type Delivery: Delivery;

    /// 다음 메시지를 기다린다. 스트림이 끝나면 `None`을 반환한다.
    async fn next_delivery(&mut self) -> Option<Result<Self::Delivery, ConnectionError>>;

    /// 채널과 연결을 닫는다.
    async fn close(self);
}

/// 브로커가 전달한 메시지 하나이다.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// 메시지 본문.
    fn payload(&self) -> &[u8];

    /// 브로커가 재전달로 표시했는지 여부.
    fn redelivered(&self) -> bool;

    /// 메시지를 확인(ack)한다.
    async fn ack(&self) -> Result<(), ConnectionError>;
}

/// 재접속 지연 정책이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
}

impl ReconnectBackoff {
    /// `base`부터 시작해 `max`까지 2배씩 늘어나는 정책을 만든다. 같으면 고정 지연이다.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// 고정 지연 정책.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    /// 연속 실패 횟수(0부터)에 해당하는 지연.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2))
    }
}

/// 큐 연결을 소유하고 작업을 한 번에 하나씩 핸들러로 넘기는 소비자이다.
///
/// 연결 오류는 모두 여기서 흡수되며, 지연 후 전체 접속 절차를 무한히 재시도한다.
pub struct JobConsumer<B: MessageBroker> {
    broker: B,
    queue: String,
    backoff: ReconnectBackoff,
    state: watch::Sender<ConnectionState>,
}

impl<B: MessageBroker> JobConsumer<B> {
    /// 브로커, 큐 이름, 재접속 정책으로 소비자를 만든다.
    pub fn new(broker: B, queue: impl Into<String>, backoff: ReconnectBackoff) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            broker,
            queue: queue.into(),
            backoff,
            state,
        }
    }

    /// 연결 상태 변화를 구독한다.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }

    /// `shutdown`이 취소될 때까지 접속과 소비를 반복한다.
    ///
    /// 처리 중인 작업은 중단하지 않고, 작업 사이와 재접속 대기 중에만 종료 신호를 본다.
    pub async fn run<H: JobHandler + ?Sized>(&self, handler: &H, shutdown: CancellationToken) {
        let mut failures: u32 = 0;
        while !shutdown.is_cancelled() {
            self.set_state(ConnectionState::Connecting);
            tracing::info!("브로커 접속 시도 (queue={})", self.queue);
            match self.broker.subscribe(&self.queue).await {
                Ok(mut subscription) => {
                    failures = 0;
                    self.set_state(ConnectionState::Connected);
                    tracing::info!("작업 소비 시작 (queue={})", self.queue);
                    let result = self.consume(&mut subscription, handler, &shutdown).await;
                    subscription.close().await;
                    self.set_state(ConnectionState::Disconnected);
                    match result {
                        Ok(()) => break,
                        Err(err) => tracing::warn!("브로커 세션 오류: {err}"),
                    }
                }
                Err(err) => {
                    self.set_state(ConnectionState::Disconnected);
                    tracing::warn!("브로커 접속 실패: {err}");
                }
            }

            let delay = self.backoff.delay_for(failures);
            failures = failures.saturating_add(1);
            tracing::info!("{}ms 후 재접속합니다.", delay.as_millis());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("작업 소비 종료");
    }

    /// 구독에서 메시지를 하나씩 꺼내 처리한다.
    ///
    /// 종료 신호로 끝나면 `Ok`, 연결이 끊기면 `Err`를 반환한다.
    async fn consume<H: JobHandler + ?Sized>(
        &self,
        subscription: &mut B::Subscription,
        handler: &H,
        shutdown: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = subscription.next_delivery() => next,
            };
            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(ConnectionError::Closed(
                        "소비자 스트림이 끝났습니다.".into(),
                    ));
                }
            };
            if delivery.payload().is_empty() {
                tracing::debug!("빈 메시지를 무시합니다.");
                continue;
            }
            if delivery.redelivered() {
                tracing::info!("재전달된 작업 메시지를 수신했습니다.");
            }
            match handler.handle(delivery.payload()).await {
                Disposition::Ack => {
                    delivery.ack().await?;
                    tracing::info!("작업 메시지 확인(ack) 완료");
                }
                Disposition::LeavePending => {
                    tracing::warn!("작업 메시지를 확인하지 않고 남겨 둡니다 (재전달 대기).");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// 이 본문을 가진 메시지는 ack 도중 채널이 끊긴다.
    const ACK_REFUSED: &[u8] = b"ack-refused";

    /// 테스트용 메시지이다.
    struct FakeDelivery {
        payload: Vec<u8>,
        redelivered: bool,
        acked: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl Delivery for FakeDelivery {
        fn payload(&self) -> &[u8] {
            &self.payload
        }

        fn redelivered(&self) -> bool {
            self.redelivered
        }

        async fn ack(&self) -> Result<(), ConnectionError> {
            if self.payload == ACK_REFUSED {
                return Err(ConnectionError::Closed("channel closed before ack".into()));
            }
            self.acked.lock().unwrap().push(self.payload.clone());
            Ok(())
        }
    }

    /// 미리 정한 메시지를 내보낸 뒤 종료 신호를 주거나 연결을 끊는 구독이다.
    struct FakeSubscription {
        queue: VecDeque<Vec<u8>>,
        acked: Arc<Mutex<Vec<Vec<u8>>>>,
        on_drain: Option<CancellationToken>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Subscription for FakeSubscription {
        type Delivery = FakeDelivery;

        async fn next_delivery(&mut self) -> Option<Result<FakeDelivery, ConnectionError>> {
            if let Some(payload) = self.queue.pop_front() {
                return Some(Ok(FakeDelivery {
                    payload,
                    redelivered: false,
                    acked: self.acked.clone(),
                }));
            }
            match &self.on_drain {
                Some(token) => {
                    token.cancel();
                    std::future::pending().await
                }
                None => None,
            }
        }

        async fn close(self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// 처음 `failures`번은 접속에 실패하고 이후 구독을 여는 브로커이다.
    struct FakeBroker {
        failures: AtomicUsize,
        attempts: Arc<AtomicUsize>,
        sessions: Mutex<VecDeque<Vec<Vec<u8>>>>,
        acked: Arc<Mutex<Vec<Vec<u8>>>>,
        shutdown: CancellationToken,
        closed: Arc<AtomicUsize>,
    }

    impl FakeBroker {
        fn new(failures: usize, sessions: Vec<Vec<&str>>, shutdown: CancellationToken) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                attempts: Arc::new(AtomicUsize::new(0)),
                sessions: Mutex::new(
                    sessions
                        .into_iter()
                        .map(|s| s.into_iter().map(|p| p.as_bytes().to_vec()).collect())
                        .collect(),
                ),
                acked: Arc::new(Mutex::new(Vec::new())),
                shutdown,
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl MessageBroker for FakeBroker {
        type Subscription = FakeSubscription;

        async fn subscribe(&self, queue: &str) -> Result<FakeSubscription, ConnectionError> {
            assert_eq!(queue, "wat_queue");
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ConnectionError::Closed("connection refused".into()));
            }
            let mut sessions = self.sessions.lock().unwrap();
            let payloads = sessions.pop_front().unwrap_or_default();
            let last = sessions.is_empty();
            Ok(FakeSubscription {
                queue: payloads.into(),
                acked: self.acked.clone(),
                on_drain: last.then(|| self.shutdown.clone()),
                closed: self.closed.clone(),
            })
        }
    }

    /// 본문이 "pending"이면 남겨 두고 나머지는 ack하는 핸들러이다.
    struct ScriptedHandler {
        handled: Mutex<Vec<Vec<u8>>>,
        in_flight: AtomicBool,
    }

    impl ScriptedHandler {
        fn new() -> Self {
            Self {
                handled: Mutex::new(Vec::new()),
                in_flight: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn handle(&self, payload: &[u8]) -> Disposition {
            assert!(
                !self.in_flight.swap(true, Ordering::SeqCst),
                "두 작업이 동시에 처리되었습니다"
            );
            tokio::task::yield_now().await;
            self.handled.lock().unwrap().push(payload.to_vec());
            self.in_flight.store(false, Ordering::SeqCst);
            if payload == b"pending" {
                Disposition::LeavePending
            } else {
                Disposition::Ack
            }
        }
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = ReconnectBackoff::default();
        assert_eq!(backoff.delay_for(0), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(100), Duration::from_secs(2));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_connect_until_broker_is_reachable() {
        let shutdown = CancellationToken::new();
        let broker = FakeBroker::new(5, vec![vec!["job-1"]], shutdown.clone());
        let attempts = broker.attempts.clone();
        let acked = broker.acked.clone();
        let consumer = JobConsumer::new(broker, "wat_queue", ReconnectBackoff::default());
        let handler = ScriptedHandler::new();

        let started = tokio::time::Instant::now();
        consumer.run(&handler, shutdown).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(acked.lock().unwrap().as_slice(), [b"job-1".to_vec()]);
        assert_eq!(*consumer.state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn acks_only_messages_the_handler_accepts() {
        let shutdown = CancellationToken::new();
        let broker = FakeBroker::new(
            0,
            vec![vec!["job-1", "", "pending", "job-2"]],
            shutdown.clone(),
        );
        let acked = broker.acked.clone();
        let consumer = JobConsumer::new(broker, "wat_queue", ReconnectBackoff::default());
        let handler = ScriptedHandler::new();

        consumer.run(&handler, shutdown).await;

        assert_eq!(
            handler.handled.lock().unwrap().as_slice(),
            [b"job-1".to_vec(), b"pending".to_vec(), b"job-2".to_vec()]
        );
        assert_eq!(
            acked.lock().unwrap().as_slice(),
            [b"job-1".to_vec(), b"job-2".to_vec()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_tears_down_and_reconnects() {
        let shutdown = CancellationToken::new();
        let broker = FakeBroker::new(
            0,
            vec![vec!["pending"], vec!["pending-again"]],
            shutdown.clone(),
        );
        let attempts = broker.attempts.clone();
        let closed = broker.closed.clone();
        let consumer = JobConsumer::new(broker, "wat_queue", ReconnectBackoff::default());
        let handler = ScriptedHandler::new();

        consumer.run(&handler, shutdown).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert_eq!(handler.handled.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ack_tears_down_and_reconnects() {
        let shutdown = CancellationToken::new();
        let broker = FakeBroker::new(
            0,
            vec![vec!["ack-refused", "never-reached"], vec!["job-2"]],
            shutdown.clone(),
        );
        let attempts = broker.attempts.clone();
        let closed = broker.closed.clone();
        let acked = broker.acked.clone();
        let consumer = JobConsumer::new(broker, "wat_queue", ReconnectBackoff::default());
        let handler = ScriptedHandler::new();

        let started = tokio::time::Instant::now();
        consumer.run(&handler, shutdown).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(
            handler.handled.lock().unwrap().as_slice(),
            [ACK_REFUSED.to_vec(), b"job-2".to_vec()]
        );
        assert_eq!(acked.lock().unwrap().as_slice(), [b"job-2".to_vec()]);
        assert_eq!(*consumer.state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn state_reports_connected_while_consuming() {
        let shutdown = CancellationToken::new();
        let broker = FakeBroker::new(1, vec![vec![]], CancellationToken::new());
        let consumer = Arc::new(JobConsumer::new(
            broker,
            "wat_queue",
            ReconnectBackoff::default(),
        ));
        let mut state = consumer.state();
        let runner = {
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let handler = ScriptedHandler::new();
                consumer.run(&handler, shutdown).await;
            })
        };

        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        shutdown.cancel();
        runner.await.unwrap();
        assert_eq!(*consumer.state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_connects() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let broker = FakeBroker::new(0, vec![], shutdown.clone());
        let attempts = broker.attempts.clone();
        let consumer = JobConsumer::new(broker, "wat_queue", ReconnectBackoff::default());
        consumer.run(&ScriptedHandler::new(), shutdown).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
