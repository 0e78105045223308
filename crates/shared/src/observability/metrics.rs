//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过导出器自带的 HTTP 监听暴露在独立端口上，供 Prometheus 抓取。
//! 未安装 recorder 时（例如单元测试）各 record_* 函数是空操作。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use super::ObservabilityConfig;

/// 初始化 Prometheus 指标导出
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_common_metrics(&config.service_name);
    info!("Metrics server listening on {}", addr);

    Ok(())
}

/// 注册通用指标描述，这些描述会出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "orders_consumed_total",
        "Total number of order records handed to the event sink"
    );
    metrics::describe_counter!(
        "orders_decode_failures_total",
        "Total number of payloads that failed to decode as an order record"
    );
    metrics::describe_counter!(
        "amqp_settle_failures_total",
        "Total number of AMQP ack/reject calls that failed"
    );
    metrics::describe_counter!(
        "subscription_failures_total",
        "Total number of subscriptions that terminated with an error"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 记录一条成功交给事件出口的订单
pub fn record_order_consumed(source: &'static str) {
    metrics::counter!("orders_consumed_total", "source" => source).increment(1);
}

/// 记录一次解码失败
pub fn record_decode_failure(source: &'static str) {
    metrics::counter!("orders_decode_failures_total", "source" => source).increment(1);
}

/// 记录一次 AMQP 确认失败，`action` 为 "ack" 或 "reject"
pub fn record_settle_failure(action: &'static str) {
    metrics::counter!("amqp_settle_failures_total", "action" => action).increment(1);
}

/// 记录一次订阅异常退出
pub fn record_subscription_failure(source: &'static str) {
    metrics::counter!("subscription_failures_total", "source" => source).increment(1);
}
