//! 欺诈检测订单消费服务
//!
//! 同时订阅两个独立运维的消息中间件：从 Kafka 按批拉取订单事件，
//! 从 AMQP 队列接收推送的订单事件并手动确认。两路消息共用同一个解码器与事件出口，
//! 任何一路的故障都不会让另一路静默停止。事件出口目前只输出结构化日志，
//! 是接入真实欺诈评分逻辑的扩展点。

pub mod amqp_subscriber;
pub mod decoder;
pub mod error;
pub mod kafka_subscriber;
pub mod sink;
pub mod subscription;
pub mod supervisor;
pub mod test_utils;
