use super::{Delivery, MessageBroker, Subscription};
use crate::error::ConnectionError;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ConfirmSelectOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};

/// 소비자당 동시에 미확인 상태로 둘 수 있는 메시지 수.
const PREFETCH_COUNT: u16 = 1;

/// 정상 종료 시 사용하는 AMQP reply code.
const REPLY_SUCCESS: u16 = 200;

/// lapin의 태스크와 소켓 I/O를 현재 tokio 런타임에서 돌리도록 설정한다.
fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

/// AmqpBroker는 lapin으로 AMQP 0-9-1 브로커에 접속하는 구현체이다.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    /// `amqp://host` 형식의 접속 URL.
    url: String,
    /// 브로커 관리 화면에 표시할 소비자 태그.
    consumer_tag: String,
}

impl AmqpBroker {
    /// 접속 URL로 브로커 어댑터를 만든다.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            consumer_tag: format!("scenario-player-{}", std::process::id()),
        }
    }

    /// 채널을 확인 모드로 열고 큐 선언, prefetch 설정, 소비 시작까지 진행한다.
    async fn open_consumer(
        connection: &Connection,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<(Channel, Consumer), ConnectionError> {
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        tracing::info!("확인 채널 생성 완료");

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        tracing::info!("내구성 큐 선언 완료: {queue}");

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;
        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok((channel, consumer))
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    type Subscription = AmqpSubscription;

    async fn subscribe(&self, queue: &str) -> Result<AmqpSubscription, ConnectionError> {
        let connection = Connection::connect(&self.url, connection_properties()).await?;
        tracing::info!("브로커 연결 완료: {}", self.url);
        match Self::open_consumer(&connection, queue, &self.consumer_tag).await {
            Ok((channel, consumer)) => Ok(AmqpSubscription {
                connection,
                channel,
                consumer,
            }),
            Err(err) => {
                // 절반만 구성된 연결을 남기지 않는다.
                let _ = connection.close(REPLY_SUCCESS, "setup failed").await;
                Err(err)
            }
        }
    }
}

/// 연결, 채널, 소비자 스트림을 함께 소유한다.
pub struct AmqpSubscription {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    type Delivery = AmqpDelivery;

    async fn next_delivery(&mut self) -> Option<Result<AmqpDelivery, ConnectionError>> {
        self.consumer.next().await.map(|result| {
            result
                .map(|inner| AmqpDelivery { inner })
                .map_err(ConnectionError::from)
        })
    }

    async fn close(self) {
        if let Err(err) = self.channel.close(REPLY_SUCCESS, "bye").await {
            tracing::debug!("채널 종료 실패: {err}");
        }
        if let Err(err) = self.connection.close(REPLY_SUCCESS, "bye").await {
            tracing::debug!("연결 종료 실패: {err}");
        }
    }
}

/// lapin Delivery를 감싼다.
pub struct AmqpDelivery {
    inner: lapin::message::Delivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn payload(&self) -> &[u8] {
        &self.inner.data
    }

    fn redelivered(&self) -> bool {
        self.inner.redelivered
    }

    async fn ack(&self) -> Result<(), ConnectionError> {
        self.inner.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }
}
