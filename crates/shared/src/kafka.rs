//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为按批拉取的消费者抽象，
//! 统一消息所有权转换、错误映射和退订语义。

use std::collections::HashMap;
use std::time::Duration;

use futures::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::IngestError;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理 Kafka topic 名称
pub mod topics {
    /// 订单服务发布订单完成事件的 topic
    pub const ORDERS: &str = "orders";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以脱离消费者借用进入批次。key 按 UTF-8 文本解读，value 保持原始字节。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 按批拉取的 Kafka 消费者
///
/// 位点由 rdkafka 自动提交，本封装不做手动位点管理。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// 只构造客户端，不会立即连接 broker；连接在首次拉取时由 librdkafka 后台建立。
    pub fn new(config: &KafkaConfig) -> Result<Self, IngestError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| IngestError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            "Kafka 消费者已初始化"
        );
        Ok(Self {
            consumer,
            group_id: config.consumer_group.clone(),
        })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), IngestError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| IngestError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, group_id = %self.group_id, "已订阅 Kafka topics");
        Ok(())
    }

    /// 拉取一批消息
    ///
    /// 最多等待 `max_wait` 拿到第一条消息；拿到后只取已在本地队列中就绪的后续消息，
    /// 不再额外等待，批次上限为 `max_batch`。等待超时返回空批次。
    /// 首条消息出错时返回错误；批次中途出错则截断批次并记录日志。
    pub async fn poll_batch(
        &self,
        max_wait: Duration,
        max_batch: usize,
    ) -> Result<Vec<ConsumerMessage>, IngestError> {
        let mut batch = Vec::new();

        match tokio::time::timeout(max_wait, self.consumer.recv()).await {
            Err(_) => return Ok(batch),
            Ok(Err(e)) => return Err(IngestError::Kafka(format!("接收消息出错: {e}"))),
            Ok(Ok(msg)) => batch.push(ConsumerMessage::from_borrowed(&msg)),
        }

        while batch.len() < max_batch.max(1) {
            match self.consumer.recv().now_or_never() {
                Some(Ok(msg)) => batch.push(ConsumerMessage::from_borrowed(&msg)),
                Some(Err(e)) => {
                    warn!(error = %e, received = batch.len(), "接收 Kafka 消息出错，截断当前批次");
                    break;
                }
                None => break,
            }
        }

        debug!(size = batch.len(), "拉取到一批 Kafka 消息");
        Ok(batch)
    }

    /// 退订所有 topic，释放分区分配
    pub fn unsubscribe(&self) {
        self.consumer.unsubscribe();
        info!(group_id = %self.group_id, "已退订 Kafka topics");
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
