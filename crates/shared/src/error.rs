//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum IngestError {
    // ==================== 配置错误 ====================
    /// 必填环境变量缺失，启动阶段即致命，不重试
    #[error("环境变量 {var} 未设置")]
    MissingEnv { var: &'static str },

    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 消息中间件错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("AMQP 错误: {0}")]
    Amqp(String),
}

impl IngestError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingEnv { .. } => "MISSING_ENV",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Amqp(_) => "AMQP_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 只有 broker 连通性问题值得退避重试，配置错误重试也不会自愈。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Kafka(_) | Self::Amqp(_))
    }
}

impl From<lapin::Error> for IngestError {
    fn from(err: lapin::Error) -> Self {
        Self::Amqp(err.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for IngestError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::Kafka(err.to_string())
    }
}
