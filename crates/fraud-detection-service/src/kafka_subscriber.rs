//! Kafka 订单订阅
//!
//! 拉取式订阅：按固定等待时间循环拉取批次，逐条解码后交给事件出口，
//! 并维护进程内的累计消费数。解码失败按 `DecodeFailurePolicy` 跳过或中止。
//! 无论以何种方式退出，返回前都会退订 topic。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fraud_shared::config::{DecodeFailurePolicy, IngestConfig, KafkaConfig};
use fraud_shared::error::IngestError;
use fraud_shared::kafka::{ConsumerMessage, KafkaConsumer};
use fraud_shared::observability::{metrics, tracing as otel};
use fraud_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::decoder::decode_order;
use crate::error::ServiceError;
use crate::sink::EventSink;
use crate::subscription::{
    Source, Subscription, SubscriptionReport, shutdown_requested, wait_for_shutdown,
};

/// 按批拉取消息的传输抽象
#[async_trait]
pub trait BatchSource: Send {
    /// 拉取一批消息，等待超时返回空批次
    async fn poll_batch(
        &mut self,
        max_wait: Duration,
        max_batch: usize,
    ) -> Result<Vec<ConsumerMessage>, IngestError>;

    /// 释放订阅
    fn release(&mut self);
}

#[async_trait]
impl BatchSource for KafkaConsumer {
    async fn poll_batch(
        &mut self,
        max_wait: Duration,
        max_batch: usize,
    ) -> Result<Vec<ConsumerMessage>, IngestError> {
        KafkaConsumer::poll_batch(self, max_wait, max_batch).await
    }

    fn release(&mut self) {
        self.unsubscribe();
    }
}

/// 拉取循环
///
/// 与具体传输无关，测试中使用内存拉取源驱动。
pub struct PullLoop<S> {
    source: S,
    sink: Arc<dyn EventSink>,
    on_decode_error: DecodeFailurePolicy,
    poll_timeout: Duration,
    max_batch: usize,
}

impl<S: BatchSource> PullLoop<S> {
    pub fn new(source: S, sink: Arc<dyn EventSink>, ingest: &IngestConfig) -> Self {
        Self {
            source,
            sink,
            on_decode_error: ingest.on_decode_error,
            poll_timeout: ingest.poll_timeout(),
            max_batch: ingest.max_batch_size,
        }
    }

    /// 运行到关闭信号触发或解码中止，退出前释放订阅
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SubscriptionReport, ServiceError> {
        let mut report = SubscriptionReport::new(Source::Kafka);

        let result = self.consume(&mut shutdown, &mut report).await;
        self.source.release();

        info!(
            consumed = report.consumed,
            decode_failures = report.decode_failures,
            "Kafka 订阅已停止"
        );
        result.map(|()| report)
    }

    async fn consume(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        report: &mut SubscriptionReport,
    ) -> Result<(), ServiceError> {
        loop {
            if shutdown_requested(shutdown) {
                return Ok(());
            }

            let polled = tokio::select! {
                biased;
                _ = shutdown.changed() => continue,
                polled = self.source.poll_batch(self.poll_timeout, self.max_batch) => polled,
            };

            let batch = match polled {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "拉取 Kafka 消息失败，稍后重试");
                    tokio::time::sleep(self.poll_timeout).await;
                    continue;
                }
            };

            for message in &batch {
                self.handle(message, report)?;
            }
        }
    }

    fn handle(
        &self,
        message: &ConsumerMessage,
        report: &mut SubscriptionReport,
    ) -> Result<(), ServiceError> {
        let span = otel::consumer_span(Source::Kafka.as_str(), &message.topic, &message.headers);
        let _entered = span.enter();

        match decode_order(&message.payload) {
            Ok(order) => {
                report.consumed += 1;
                self.sink
                    .on_order(Source::Kafka, &order, Some(report.consumed));
                Ok(())
            }
            Err(e) => {
                report.decode_failures += 1;
                metrics::record_decode_failure(Source::Kafka.as_str());
                error!(
                    error = %e,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "订单记录解码失败"
                );

                match self.on_decode_error {
                    DecodeFailurePolicy::Skip => Ok(()),
                    DecodeFailurePolicy::Abort => Err(ServiceError::Decode {
                        source_name: Source::Kafka,
                        error: e,
                    }),
                }
            }
        }
    }
}

#[async_trait]
impl<S: BatchSource + 'static> Subscription for PullLoop<S> {
    fn source(&self) -> Source {
        Source::Kafka
    }

    async fn run(
        self: Box<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SubscriptionReport, ServiceError> {
        PullLoop::run(*self, shutdown).await
    }
}

/// Kafka 订阅
pub struct KafkaSubscriber {
    config: KafkaConfig,
    ingest: IngestConfig,
    sink: Arc<dyn EventSink>,
}

impl KafkaSubscriber {
    pub fn new(config: KafkaConfig, ingest: IngestConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            ingest,
            sink,
        }
    }

    /// 创建消费者并订阅 topic
    async fn open(&self) -> Result<KafkaConsumer, IngestError> {
        let policy = RetryPolicy::for_connect(self.ingest.connect_max_retries);
        let config = &self.config;

        retry_with_policy(&policy, "kafka_subscribe", IngestError::is_retryable, || async move {
            let consumer = KafkaConsumer::new(config)?;
            consumer.subscribe(&[config.topic.as_str()])?;
            Ok(consumer)
        })
        .await
    }
}

#[async_trait]
impl Subscription for KafkaSubscriber {
    fn source(&self) -> Source {
        Source::Kafka
    }

    async fn run(
        self: Box<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SubscriptionReport, ServiceError> {
        let consumer = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => {
                return Ok(SubscriptionReport::new(Source::Kafka));
            }
            opened = self.open() => opened?,
        };

        info!(topic = %self.config.topic, "Kafka 订阅已启动");
        PullLoop::new(consumer, self.sink.clone(), &self.ingest)
            .run(shutdown)
            .await
    }
}
