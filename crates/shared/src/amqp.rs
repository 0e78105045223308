//! AMQP 基础设施封装
//!
//! 将 lapin 的连接、channel 与 consumer 封装为手动确认的会话抽象。
//! 建连流程：URI（host/vhost/凭据）-> 连接 -> channel（会话）-> QoS -> 声明队列 -> 挂载消费者。
//! 每一步成功后才进入下一步，任何一步失败都直接返回错误，已打开的连接随之关闭。

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions,
    BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AmqpConfig;
use crate::error::IngestError;

/// 正常关闭时使用的 AMQP reply code
const REPLY_SUCCESS: u16 = 200;

// ---------------------------------------------------------------------------
// AmqpDelivery
// ---------------------------------------------------------------------------

/// 投递到本消费者的一条消息
///
/// 持有 body 的完整拷贝以及确认句柄；确认动作只能由持有者显式发起。
pub struct AmqpDelivery {
    pub delivery_tag: u64,
    /// broker 曾投递过且未被确认
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    acker: Acker,
}

impl AmqpDelivery {
    fn from_delivery(delivery: Delivery) -> Self {
        let content_type = delivery
            .properties
            .content_type()
            .as_ref()
            .map(|ct| ct.as_str().to_string());

        let mut headers = HashMap::new();
        if let Some(table) = delivery.properties.headers() {
            for (key, value) in table.inner() {
                if let Some(text) = amqp_value_as_text(value) {
                    headers.insert(key.as_str().to_string(), text);
                }
            }
        }

        Self {
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            content_type,
            headers,
            body: delivery.data,
            acker: delivery.acker,
        }
    }

    /// 是否为二进制消息
    ///
    /// 文本与 JSON 类型的消息不是订单协议的载体，其余（含未声明类型）按二进制处理。
    pub fn is_binary(&self) -> bool {
        is_binary_content_type(self.content_type.as_deref())
    }

    /// 确认消息已消费
    pub async fn ack(&self) -> Result<(), IngestError> {
        self.acker.ack(BasicAckOptions::default()).await?;
        debug!(delivery_tag = self.delivery_tag, "AMQP 消息已确认");
        Ok(())
    }

    /// 拒收消息且不重新入队，由 broker 的死信策略接管
    pub async fn reject(&self) -> Result<(), IngestError> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await?;
        debug!(delivery_tag = self.delivery_tag, "AMQP 消息已拒收");
        Ok(())
    }
}

/// 按 content-type 判断消息体是否为二进制
pub fn is_binary_content_type(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.trim().to_ascii_lowercase();
            !(ct.starts_with("text/") || ct.starts_with("application/json"))
        }
    }
}

fn amqp_value_as_text(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// AmqpSession
// ---------------------------------------------------------------------------

/// 一条 AMQP 连接及其上唯一的 channel
///
/// 连接与 channel 由订阅者独占，不在任务之间共享。
pub struct AmqpSession {
    connection: Arc<Connection>,
    channel: Channel,
    queue: String,
}

impl AmqpSession {
    /// 建立连接并打开会话
    pub async fn connect(config: &AmqpConfig) -> Result<Self, IngestError> {
        let properties =
            ConnectionProperties::default().with_connection_name("fraud-detection-service".into());

        let connection = Connection::connect(&config.uri(), properties)
            .await
            .map_err(|e| {
                IngestError::Amqp(format!("连接 {} 失败: {e}", config.redacted_uri()))
            })?;
        info!(uri = %config.redacted_uri(), "AMQP 连接已建立");

        // 会话建成之前失败或被取消时关闭连接
        let connection = Arc::new(connection);
        let pending = ReleaseOnDrop::new({
            let connection = connection.clone();
            move || close_in_background(connection)
        });

        let channel = connection.create_channel().await?;
        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        info!(queue = %config.queue, prefetch = config.prefetch, "AMQP 队列已绑定");

        pending.disarm();
        Ok(Self {
            connection,
            channel,
            queue: config.queue.clone(),
        })
    }

    /// 在队列上挂载手动确认的消费者
    pub async fn consume(&self) -> Result<AmqpConsumer, IngestError> {
        let tag = format!("fraud-detection-{}", Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                &self.queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.queue, consumer_tag = %tag, "AMQP 消费者已启动");
        Ok(AmqpConsumer { consumer, tag })
    }

    /// 取消消费者并依次关闭 channel 与连接
    ///
    /// 关闭过程中的错误只记录日志，不影响调用方退出。
    pub async fn close(self, consumer: Option<AmqpConsumer>) {
        if let Some(consumer) = consumer
            && let Err(e) = self
                .channel
                .basic_cancel(&consumer.tag, BasicCancelOptions::default())
                .await
        {
            warn!(error = %e, consumer_tag = %consumer.tag, "取消 AMQP 消费者失败");
        }

        if let Err(e) = self.channel.close(REPLY_SUCCESS, "OK").await {
            warn!(error = %e, "关闭 AMQP channel 失败");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "OK").await {
            warn!(error = %e, "关闭 AMQP 连接失败");
        }

        info!(queue = %self.queue, "AMQP 会话已关闭");
    }
}

/// 在后台关闭一条未完成建连的连接
fn close_in_background(connection: Arc<Connection>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("没有可用的运行时，无法关闭 AMQP 连接");
        return;
    };

    runtime.spawn(async move {
        match connection.close(REPLY_SUCCESS, "setup aborted").await {
            Ok(()) => info!("建连未完成，AMQP 连接已关闭"),
            Err(e) => warn!(error = %e, "关闭未完成的 AMQP 连接失败"),
        }
    });
}

/// 在 `disarm` 之前被丢弃时执行一次释放动作
struct ReleaseOnDrop<F: FnOnce()> {
    release: Option<F>,
}

impl<F: FnOnce()> ReleaseOnDrop<F> {
    fn new(release: F) -> Self {
        Self {
            release: Some(release),
        }
    }

    /// 资源已移交，不再释放
    fn disarm(mut self) {
        self.release = None;
    }
}

impl<F: FnOnce()> Drop for ReleaseOnDrop<F> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

// ---------------------------------------------------------------------------
// AmqpConsumer
// ---------------------------------------------------------------------------

/// 按到达顺序产出投递的消费者
pub struct AmqpConsumer {
    consumer: Consumer,
    tag: String,
}

impl AmqpConsumer {
    /// 等待下一条投递，流结束时返回 `None`
    pub async fn next(&mut self) -> Option<Result<AmqpDelivery, IngestError>> {
        self.consumer.next().await.map(|result| {
            result
                .map(AmqpDelivery::from_delivery)
                .map_err(IngestError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_guard(count: &Arc<AtomicUsize>) -> ReleaseOnDrop<impl FnOnce()> {
        let count = count.clone();
        ReleaseOnDrop::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn declare_rejected() -> Result<(), IngestError> {
        Err(IngestError::Amqp("queue_declare 被拒绝".to_string()))
    }

    async fn failing_setup(count: Arc<AtomicUsize>) -> Result<(), IngestError> {
        let pending = counting_guard(&count);
        declare_rejected().await?;
        pending.disarm();
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_setup_step_releases_connection() {
        let count = Arc::new(AtomicUsize::new(0));

        assert!(failing_setup(count.clone()).await.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completed_setup_keeps_connection() {
        let count = Arc::new(AtomicUsize::new(0));

        counting_guard(&count).disarm();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_setup_releases_connection_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let setup = {
            let count = count.clone();
            async move {
                let pending = counting_guard(&count);
                tokio::time::sleep(Duration::from_secs(60)).await;
                pending.disarm();
            }
        };

        let finished = tokio::time::timeout(Duration::from_millis(10), setup).await;

        assert!(finished.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_binary_content_types() {
        assert!(is_binary_content_type(None));
        assert!(is_binary_content_type(Some("application/octet-stream")));
        assert!(is_binary_content_type(Some("application/x-protobuf")));
    }

    #[test]
    fn test_text_content_types_are_not_binary() {
        assert!(!is_binary_content_type(Some("text/plain")));
        assert!(!is_binary_content_type(Some("Text/Plain; charset=utf-8")));
        assert!(!is_binary_content_type(Some("application/json")));
    }

    #[test]
    fn test_header_value_conversion() {
        let short = AMQPValue::ShortString("00-abc-def-01".into());
        assert_eq!(amqp_value_as_text(&short).as_deref(), Some("00-abc-def-01"));
        assert_eq!(amqp_value_as_text(&AMQPValue::Boolean(true)), None);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let config = AmqpConfig {
            host: "127.0.0.1:1".to_string(),
            ..Default::default()
        };

        let err = AmqpSession::connect(&config).await.err().unwrap();
        assert!(err.is_retryable());
        // 错误信息中不应出现明文密码
        assert!(!err.to_string().contains("default:default@"));
    }
}
