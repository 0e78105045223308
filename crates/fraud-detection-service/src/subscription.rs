//! 订阅能力抽象
//!
//! Kafka 与 AMQP 两种后端都实现 `Subscription`，supervisor 只依赖这一抽象；
//! 解码与事件出口逻辑因此只写一份，与具体后端无关。

use std::fmt;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::ServiceError;

/// 消息来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// 拉取式后端
    Kafka,
    /// 推送式后端
    Amqp,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::Amqp => "amqp",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订阅退出时的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionReport {
    pub source: Source,
    /// 成功交给事件出口的记录数
    pub consumed: u64,
    pub decode_failures: u64,
    /// 非二进制、未解码即确认的消息数（仅 AMQP）
    pub skipped: u64,
}

impl SubscriptionReport {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            consumed: 0,
            decode_failures: 0,
            skipped: 0,
        }
    }
}

/// 一条独立运行的订阅
///
/// `run` 在收到关闭信号（值变为 `true` 或发送端被丢弃）后尽快返回，
/// 返回前必须释放自己持有的 broker 资源，无论是正常退出还是出错退出。
#[async_trait]
pub trait Subscription: Send {
    fn source(&self) -> Source;

    async fn run(
        self: Box<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SubscriptionReport, ServiceError>;
}

/// 关闭信号是否已触发
///
/// 发送端被丢弃同样视为关闭，避免 `changed()` 持续立即返回导致空转。
pub(crate) fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// 等待关闭信号触发
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !shutdown_requested(shutdown) {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
