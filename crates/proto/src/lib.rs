//! 跨服务共享的订单协议定义
//!
//! 订单服务发布到 Kafka 与 AMQP 的负载都是 `OrderResult` 的 protobuf 编码，
//! 各消费方统一依赖本 crate，避免各自维护字段编号。

pub mod order;

pub use order::{Address, CartItem, Money, OrderItem, OrderResult};
