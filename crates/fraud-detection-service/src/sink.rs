//! 事件出口
//!
//! 解码后的订单在这里产生唯一的可观测副作用。两个订阅任务会并发调用，
//! 实现必须是 `Send + Sync` 且不能向调用方抛出错误；接入欺诈评分时替换这里即可。

use fraud_shared::observability::metrics;
use order_proto::OrderResult;
use tracing::info;

use crate::subscription::Source;

/// 事件出口
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// 处理一条已解码的订单，`total_count` 为 Kafka 路径的累计消费数
    fn on_order(&self, source: Source, order: &OrderResult, total_count: Option<u64>);
}

/// 以结构化日志输出订单的默认出口
///
/// 每条订单对应一个 tracing 事件，由 fmt 层整行写出。
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_order(&self, source: Source, order: &OrderResult, total_count: Option<u64>) {
        metrics::record_order_consumed(source.as_str());

        match total_count {
            Some(total) => info!(
                source = %source,
                order_id = %order.order_id,
                items = order.items.len(),
                total_count = total,
                "已消费订单记录，累计消费数已更新"
            ),
            None => info!(
                source = %source,
                order_id = %order.order_id,
                items = order.items.len(),
                "已消费订单记录"
            ),
        }
    }
}
