//! 测试工具模块
//!
//! 提供订单测试数据、记录调用的事件出口，以及两种传输抽象的内存实现，
//! 让拉取与推送循环可以在没有 broker 的情况下被完整驱动。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fraud_shared::error::IngestError;
use fraud_shared::kafka::{ConsumerMessage, topics};
use order_proto::{CartItem, Money, OrderItem, OrderResult};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::amqp_subscriber::{Delivery, DeliveryStream};
use crate::decoder::encode_order;
use crate::kafka_subscriber::BatchSource;
use crate::sink::EventSink;
use crate::subscription::Source;

// ==================== 测试数据 ====================

/// 构造一条带一个商品的订单
pub fn test_order(order_id: &str) -> OrderResult {
    OrderResult {
        order_id: order_id.to_string(),
        shipping_tracking_id: format!("trk-{order_id}"),
        shipping_cost: Some(Money {
            currency_code: "USD".to_string(),
            units: 8,
            nanos: 990_000_000,
        }),
        items: vec![OrderItem {
            item: Some(CartItem {
                product_id: "OLJCESPC7Z".to_string(),
                quantity: 1,
            }),
            cost: Some(Money {
                currency_code: "USD".to_string(),
                units: 19,
                nanos: 990_000_000,
            }),
        }],
        ..Default::default()
    }
}

/// 订单的线上编码
pub fn encoded(order_id: &str) -> Vec<u8> {
    encode_order(&test_order(order_id))
}

/// 构造一条 orders topic 上的消息
pub fn kafka_message(offset: i64, payload: Vec<u8>) -> ConsumerMessage {
    ConsumerMessage {
        topic: topics::ORDERS.to_string(),
        partition: 0,
        offset,
        key: None,
        payload,
        timestamp: None,
        headers: HashMap::new(),
    }
}

// ==================== 记录型事件出口 ====================

/// 事件出口收到的一次调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOrder {
    pub source: Source,
    pub order_id: String,
    pub total_count: Option<u64>,
}

/// 按调用顺序记录所有订单的事件出口
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<RecordedOrder>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<RecordedOrder> {
        self.calls.lock().clone()
    }

    pub fn order_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|call| call.order_id.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_order(&self, source: Source, order: &OrderResult, total_count: Option<u64>) {
        self.calls.lock().push(RecordedOrder {
            source,
            order_id: order.order_id.clone(),
            total_count,
        });
    }
}

// ==================== 拉取式传输 ====================

/// 按预设批次返回消息的拉取源
///
/// 批次耗尽后若配置了关闭信号则立即触发关闭，否则每次等待 `max_wait` 后返回空批次。
pub struct FakeBatchSource {
    batches: VecDeque<Result<Vec<ConsumerMessage>, IngestError>>,
    shutdown_when_drained: Option<watch::Sender<bool>>,
    released: Arc<AtomicBool>,
    polls: Arc<AtomicUsize>,
}

impl FakeBatchSource {
    pub fn new() -> Self {
        Self {
            batches: VecDeque::new(),
            shutdown_when_drained: None,
            released: Arc::new(AtomicBool::new(false)),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_batch(mut self, batch: Vec<ConsumerMessage>) -> Self {
        self.batches.push_back(Ok(batch));
        self
    }

    pub fn with_error(mut self, error: IngestError) -> Self {
        self.batches.push_back(Err(error));
        self
    }

    pub fn shutdown_when_drained(mut self, shutdown: watch::Sender<bool>) -> Self {
        self.shutdown_when_drained = Some(shutdown);
        self
    }

    /// 是否已释放订阅
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }

    /// 已拉取的次数
    pub fn poll_counter(&self) -> Arc<AtomicUsize> {
        self.polls.clone()
    }
}

impl Default for FakeBatchSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchSource for FakeBatchSource {
    async fn poll_batch(
        &mut self,
        max_wait: Duration,
        max_batch: usize,
    ) -> Result<Vec<ConsumerMessage>, IngestError> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        if let Some(next) = self.batches.pop_front() {
            return next.map(|mut batch| {
                batch.truncate(max_batch.max(1));
                batch
            });
        }

        match &self.shutdown_when_drained {
            Some(shutdown) => {
                let _ = shutdown.send(true);
            }
            None => tokio::time::sleep(max_wait).await,
        }
        Ok(Vec::new())
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

// ==================== 推送式传输 ====================

/// 一次确认动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack(u64),
    Reject(u64),
}

/// 所有投递共用的确认记录
pub type SettlementLog = Arc<Mutex<Vec<Settlement>>>;

/// 内存中的一条投递
pub struct FakeDelivery {
    tag: u64,
    binary: bool,
    body: Vec<u8>,
    headers: HashMap<String, String>,
    settlements: SettlementLog,
    fail_settle: bool,
}

impl FakeDelivery {
    fn settle(&self, settlement: Settlement) -> Result<(), IngestError> {
        if self.fail_settle {
            return Err(IngestError::Amqp("channel 已关闭".to_string()));
        }
        self.settlements.lock().push(settlement);
        Ok(())
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    fn is_binary(&self) -> bool {
        self.binary
    }

    fn redelivered(&self) -> bool {
        false
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    async fn ack(&self) -> Result<(), IngestError> {
        self.settle(Settlement::Ack(self.tag))
    }

    async fn reject(&self) -> Result<(), IngestError> {
        self.settle(Settlement::Reject(self.tag))
    }
}

/// 预设投递序列的推送流
///
/// 序列耗尽后的行为：默认保持挂起直到关闭，也可以配置为流结束或触发关闭信号。
pub struct FakeDeliveryStream {
    queue: VecDeque<Result<FakeDelivery, IngestError>>,
    settlements: SettlementLog,
    next_tag: u64,
    fail_settle: bool,
    end_when_drained: bool,
    shutdown_when_drained: Option<watch::Sender<bool>>,
    closed: Arc<AtomicBool>,
}

impl FakeDeliveryStream {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            settlements: Arc::new(Mutex::new(Vec::new())),
            next_tag: 1,
            fail_settle: false,
            end_when_drained: false,
            shutdown_when_drained: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn push(mut self, binary: bool, body: Vec<u8>) -> Self {
        let delivery = FakeDelivery {
            tag: self.next_tag,
            binary,
            body,
            headers: HashMap::new(),
            settlements: self.settlements.clone(),
            fail_settle: self.fail_settle,
        };
        self.next_tag += 1;
        self.queue.push_back(Ok(delivery));
        self
    }

    /// 追加一条二进制投递
    pub fn with_binary(self, body: Vec<u8>) -> Self {
        self.push(true, body)
    }

    /// 追加一条文本投递
    pub fn with_text(self, body: &str) -> Self {
        self.push(false, body.as_bytes().to_vec())
    }

    pub fn with_error(mut self, error: IngestError) -> Self {
        self.queue.push_back(Err(error));
        self
    }

    /// 之后追加的投递在确认时都返回错误
    pub fn failing_settlements(mut self) -> Self {
        self.fail_settle = true;
        self
    }

    pub fn end_when_drained(mut self) -> Self {
        self.end_when_drained = true;
        self
    }

    pub fn shutdown_when_drained(mut self, shutdown: watch::Sender<bool>) -> Self {
        self.shutdown_when_drained = Some(shutdown);
        self
    }

    pub fn settlements(&self) -> SettlementLog {
        self.settlements.clone()
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

impl Default for FakeDeliveryStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryStream for FakeDeliveryStream {
    type Item = FakeDelivery;

    async fn next_delivery(&mut self) -> Option<Result<FakeDelivery, IngestError>> {
        if let Some(next) = self.queue.pop_front() {
            return Some(next);
        }
        if self.end_when_drained {
            return None;
        }
        if let Some(shutdown) = &self.shutdown_when_drained {
            let _ = shutdown.send(true);
        }
        std::future::pending().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
