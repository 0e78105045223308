//! 共享库
//!
//! 包含订单消费节点共用的配置、错误处理、Kafka/AMQP 客户端封装、重试与可观测性等基础设施代码。

pub mod amqp;
pub mod config;
pub mod error;
pub mod kafka;
pub mod observability;
pub mod retry;
