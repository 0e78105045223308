//! 订单消费服务错误类型
//!
//! 在共享库 IngestError 基础上增加解码错误与关闭超时，
//! 便于 supervisor 区分"坏消息导致中止"与"broker 故障"。

use fraud_shared::error::IngestError;

use crate::decoder::DecodeError;
use crate::subscription::Source;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// 解码失败且策略要求中止
    #[error("订单解码失败（{source_name}）: {error}")]
    Decode {
        source_name: Source,
        #[source]
        error: DecodeError,
    },

    /// 订阅在关闭宽限期内没有退出
    #[error("订阅未在关闭宽限期内退出: {0}")]
    ShutdownTimeout(Source),

    /// 透传共享库错误
    #[error(transparent)]
    Shared(#[from] IngestError),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "DECODE_ERROR",
            Self::ShutdownTimeout(_) => "SHUTDOWN_TIMEOUT",
            Self::Shared(e) => e.code(),
        }
    }
}
