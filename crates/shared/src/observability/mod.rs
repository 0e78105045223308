//! 统一可观测性模块
//!
//! 提供 logging、tracing、metrics 的统一初始化和管理。
//! 两个订阅路径共用同一套日志格式与指标命名。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，用于标识追踪和指标的来源
    pub service_name: String,

    /// OpenTelemetry OTLP 端点，为空时禁用分布式追踪导出
    pub otlp_endpoint: Option<String>,

    /// 是否启动 Prometheus 指标导出
    pub metrics_enabled: bool,

    /// Prometheus 指标导出端口
    pub metrics_port: u16,

    /// 日志级别（如 "info", "debug"）
    pub log_level: String,

    /// 是否启用 JSON 格式日志
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            otlp_endpoint: None,
            metrics_enabled: true,
            metrics_port: 9090,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }

    /// 用 OTLP_ENDPOINT / METRICS_PORT / METRICS_ENABLED / RUST_LOG / JSON_LOGS 覆盖配置值
    pub fn with_overrides<F>(mut self, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("OTLP_ENDPOINT").filter(|v| !v.is_empty()) {
            self.otlp_endpoint = Some(endpoint);
        }
        if let Some(port) = lookup("METRICS_PORT").and_then(|v| v.parse().ok()) {
            self.metrics_port = port;
        }
        if let Some(enabled) = lookup("METRICS_ENABLED") {
            self.metrics_enabled = is_truthy(&enabled);
        }
        if let Some(level) = lookup("RUST_LOG").filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
        if let Some(json) = lookup("JSON_LOGS") {
            self.json_logs = is_truthy(&json);
        }
        self
    }
}

fn is_truthy(value: &str) -> bool {
    value == "true" || value == "1"
}

/// 可观测性资源守卫
///
/// 持有各种可观测性资源的生命周期。
/// 当 Guard 被 drop 时，会优雅关闭追踪 provider 并刷新待发送数据。
pub struct ObservabilityGuard {
    _tracing_guard: Option<tracing::TracingGuard>,
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self {
            _tracing_guard: None,
        }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志和追踪）
/// 2. Metrics（Prometheus 指标）
///
/// 需要在 Tokio 运行时内调用，指标导出器会在运行时上启动 HTTP 监听。
pub fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;

    info!(
        service = %config.service_name,
        metrics_enabled = config.metrics_enabled,
        metrics_port = config.metrics_port,
        otlp_endpoint = ?config.otlp_endpoint,
        "Observability initialized"
    );

    if config.metrics_enabled {
        metrics::init(config)?;
    }

    Ok(ObservabilityGuard {
        _tracing_guard: Some(tracing_guard),
    })
}
