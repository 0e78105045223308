//! AMQP 订单订阅
//!
//! 推送式订阅：broker 按到达顺序推送投递，本订阅逐条处理并手动确认。
//! 只解码二进制消息；文本类消息记录告警后直接确认。先交给事件出口再确认，
//! 确认方式由 `AckPolicy` 决定。投递流出错或意外结束时本订阅退出，
//! 不影响 Kafka 订阅。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fraud_shared::amqp::{AmqpConsumer, AmqpDelivery, AmqpSession};
use fraud_shared::config::{AckPolicy, AmqpConfig, IngestConfig};
use fraud_shared::error::IngestError;
use fraud_shared::observability::{metrics, tracing as otel};
use fraud_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::watch;
use tracing::{Instrument, error, info, warn};

use crate::decoder::decode_order;
use crate::error::ServiceError;
use crate::sink::EventSink;
use crate::subscription::{
    Source, Subscription, SubscriptionReport, shutdown_requested, wait_for_shutdown,
};

/// 一条待确认的投递
#[async_trait]
pub trait Delivery: Send + Sync {
    fn delivery_tag(&self) -> u64;

    /// 消息体是否为二进制
    fn is_binary(&self) -> bool;

    /// broker 是否曾投递过这条消息
    fn redelivered(&self) -> bool;

    fn body(&self) -> &[u8];

    fn headers(&self) -> &HashMap<String, String>;

    async fn ack(&self) -> Result<(), IngestError>;

    /// 拒收且不重新入队
    async fn reject(&self) -> Result<(), IngestError>;
}

/// 按到达顺序产出投递的推送流
#[async_trait]
pub trait DeliveryStream: Send {
    type Item: Delivery;

    /// 等待下一条投递，流结束返回 `None`
    async fn next_delivery(&mut self) -> Option<Result<Self::Item, IngestError>>;

    /// 取消消费并释放会话，可重复调用
    async fn close(&mut self);
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn is_binary(&self) -> bool {
        AmqpDelivery::is_binary(self)
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    async fn ack(&self) -> Result<(), IngestError> {
        AmqpDelivery::ack(self).await
    }

    async fn reject(&self) -> Result<(), IngestError> {
        AmqpDelivery::reject(self).await
    }
}

/// 一个 AMQP 会话及挂在其上的消费者
pub struct AmqpStream {
    session: Option<AmqpSession>,
    consumer: Option<AmqpConsumer>,
}

impl AmqpStream {
    /// 建立会话并挂载消费者
    pub async fn open(config: &AmqpConfig) -> Result<Self, IngestError> {
        let session = AmqpSession::connect(config).await?;

        match session.consume().await {
            Ok(consumer) => Ok(Self {
                session: Some(session),
                consumer: Some(consumer),
            }),
            Err(e) => {
                session.close(None).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl DeliveryStream for AmqpStream {
    type Item = AmqpDelivery;

    async fn next_delivery(&mut self) -> Option<Result<AmqpDelivery, IngestError>> {
        match self.consumer.as_mut() {
            Some(consumer) => consumer.next().await,
            None => None,
        }
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close(self.consumer.take()).await;
        }
    }
}

/// 单条投递的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Processed {
    Forwarded,
    Skipped,
    DecodeFailed,
}

/// 推送循环
pub struct PushLoop<S> {
    stream: S,
    sink: Arc<dyn EventSink>,
    ack_policy: AckPolicy,
    queue: String,
}

impl<S: DeliveryStream> PushLoop<S> {
    pub fn new(
        stream: S,
        sink: Arc<dyn EventSink>,
        ack_policy: AckPolicy,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            stream,
            sink,
            ack_policy,
            queue: queue.into(),
        }
    }

    /// 运行到关闭信号触发或投递流失效，退出前关闭会话
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SubscriptionReport, ServiceError> {
        let mut report = SubscriptionReport::new(Source::Amqp);

        let result = self.consume(&mut shutdown, &mut report).await;
        self.stream.close().await;

        info!(
            consumed = report.consumed,
            decode_failures = report.decode_failures,
            skipped = report.skipped,
            "AMQP 订阅已停止"
        );
        result.map(|()| report).map_err(ServiceError::from)
    }

    async fn consume(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        report: &mut SubscriptionReport,
    ) -> Result<(), IngestError> {
        loop {
            if shutdown_requested(shutdown) {
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => continue,
                next = self.stream.next_delivery() => next,
            };

            match next {
                Some(Ok(delivery)) => self.handle(&delivery, report).await,
                Some(Err(e)) => {
                    error!(error = %e, queue = %self.queue, "AMQP 投递流出错");
                    return Err(e);
                }
                None if shutdown_requested(shutdown) => return Ok(()),
                None => {
                    error!(queue = %self.queue, "AMQP 投递流意外结束");
                    return Err(IngestError::Amqp("投递流已结束".to_string()));
                }
            }
        }
    }

    async fn handle(&mut self, delivery: &S::Item, report: &mut SubscriptionReport) {
        let span = otel::consumer_span(Source::Amqp.as_str(), &self.queue, delivery.headers());
        let processed = span.in_scope(|| self.process(delivery, report));

        settle(delivery, processed, self.ack_policy)
            .instrument(span)
            .await;
    }

    fn process(&self, delivery: &S::Item, report: &mut SubscriptionReport) -> Processed {
        if !delivery.is_binary() {
            report.skipped += 1;
            warn!(
                delivery_tag = delivery.delivery_tag(),
                queue = %self.queue,
                "收到非二进制消息，跳过解码"
            );
            return Processed::Skipped;
        }

        match decode_order(delivery.body()) {
            Ok(order) => {
                report.consumed += 1;
                self.sink.on_order(Source::Amqp, &order, None);
                Processed::Forwarded
            }
            Err(e) => {
                report.decode_failures += 1;
                metrics::record_decode_failure(Source::Amqp.as_str());
                error!(
                    error = %e,
                    delivery_tag = delivery.delivery_tag(),
                    redelivered = delivery.redelivered(),
                    queue = %self.queue,
                    "订单记录解码失败"
                );
                Processed::DecodeFailed
            }
        }
    }
}

/// 按处理结果确认或拒收一条投递
async fn settle<D: Delivery>(delivery: &D, processed: Processed, ack_policy: AckPolicy) {
    let reject = processed == Processed::DecodeFailed && ack_policy == AckPolicy::RejectOnFailure;

    let (action, result) = if reject {
        ("reject", delivery.reject().await)
    } else {
        ("ack", delivery.ack().await)
    };

    if let Err(e) = result {
        metrics::record_settle_failure(action);
        warn!(
            error = %e,
            action,
            delivery_tag = delivery.delivery_tag(),
            "AMQP 消息确认失败"
        );
    }
}

#[async_trait]
impl<S: DeliveryStream + 'static> Subscription for PushLoop<S> {
    fn source(&self) -> Source {
        Source::Amqp
    }

    async fn run(
        self: Box<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SubscriptionReport, ServiceError> {
        PushLoop::run(*self, shutdown).await
    }
}

/// AMQP 订阅
pub struct AmqpSubscriber {
    config: AmqpConfig,
    ingest: IngestConfig,
    sink: Arc<dyn EventSink>,
}

impl AmqpSubscriber {
    pub fn new(config: AmqpConfig, ingest: IngestConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            ingest,
            sink,
        }
    }

    async fn open(&self) -> Result<AmqpStream, IngestError> {
        let policy = RetryPolicy::for_connect(self.ingest.connect_max_retries);
        let config = &self.config;

        retry_with_policy(&policy, "amqp_connect", IngestError::is_retryable, || {
            AmqpStream::open(config)
        })
        .await
    }
}

#[async_trait]
impl Subscription for AmqpSubscriber {
    fn source(&self) -> Source {
        Source::Amqp
    }

    async fn run(
        self: Box<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SubscriptionReport, ServiceError> {
        let stream = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => {
                return Ok(SubscriptionReport::new(Source::Amqp));
            }
            opened = self.open() => opened?,
        };

        info!(
            uri = %self.config.redacted_uri(),
            queue = %self.config.queue,
            "AMQP 订阅已启动"
        );
        PushLoop::new(stream, self.sink.clone(), self.ingest.ack_policy, &self.config.queue)
            .run(shutdown)
            .await
    }
}
