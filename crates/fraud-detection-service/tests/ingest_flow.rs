//! 双路消费端到端测试
//!
//! 用内存传输代替 broker，通过 Supervisor 同时驱动拉取与推送两路订阅。

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use fraud_detection_service::amqp_subscriber::PushLoop;
use fraud_detection_service::kafka_subscriber::PullLoop;
use fraud_detection_service::subscription::Source;
use fraud_detection_service::supervisor::Supervisor;
use fraud_detection_service::test_utils::{
    FakeBatchSource, FakeDeliveryStream, RecordingSink, Settlement, encoded, kafka_message,
};
use fraud_shared::config::{AckPolicy, AppConfig, IngestConfig, KAFKA_ADDR_ENV};
use fraud_shared::error::IngestError;
use fraud_shared::kafka::topics;

fn ingest() -> IngestConfig {
    IngestConfig {
        poll_timeout_ms: 10,
        shutdown_grace_secs: 1,
        ..Default::default()
    }
}

/// 等待事件出口收到指定数量的订单
async fn until_sink_has(sink: Arc<RecordingSink>, expected: usize) {
    while sink.calls().len() < expected {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_both_sources_feed_the_same_sink() {
    let sink = RecordingSink::new();

    let kafka = FakeBatchSource::new()
        .with_batch(vec![
            kafka_message(0, encoded("k1")),
            kafka_message(1, encoded("k2")),
        ])
        .with_batch(vec![
            kafka_message(2, vec![0x0A, 0x09]),
            kafka_message(3, encoded("k3")),
        ]);
    let kafka_released = kafka.released_flag();

    let amqp = FakeDeliveryStream::new()
        .with_binary(encoded("a1"))
        .with_binary(vec![0x12, 0x34])
        .with_text("hello")
        .with_binary(encoded("a2"));
    let settlements = amqp.settlements();
    let amqp_closed = amqp.closed_flag();

    let primary = PullLoop::new(kafka, sink.clone(), &ingest());
    let background = PushLoop::new(amqp, sink.clone(), AckPolicy::Always, "fraud-detection-orders");

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        Supervisor::new(
            Box::new(primary),
            Box::new(background),
            ingest().shutdown_grace(),
        )
        .run(until_sink_has(sink.clone(), 5)),
    )
    .await
    .expect("五条订单到齐后应当退出")
    .unwrap();

    assert_eq!(report.source, Source::Kafka);
    assert_eq!(report.consumed, 3);
    assert_eq!(report.decode_failures, 1);

    let calls = sink.calls();
    let kafka_calls: Vec<_> = calls
        .iter()
        .filter(|c| c.source == Source::Kafka)
        .map(|c| (c.order_id.as_str(), c.total_count))
        .collect();
    assert_eq!(
        kafka_calls,
        vec![("k1", Some(1)), ("k2", Some(2)), ("k3", Some(3))]
    );

    let amqp_ids: Vec<_> = calls
        .iter()
        .filter(|c| c.source == Source::Amqp)
        .map(|c| c.order_id.as_str())
        .collect();
    assert_eq!(amqp_ids, vec!["a1", "a2"]);

    let expected: Vec<_> = (1..=4).map(Settlement::Ack).collect();
    assert_eq!(*settlements.lock(), expected);

    assert!(kafka_released.load(Ordering::SeqCst));
    assert!(amqp_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_amqp_failure_leaves_kafka_running() {
    let sink = RecordingSink::new();

    let kafka = FakeBatchSource::new()
        .with_batch(vec![kafka_message(0, encoded("k1"))])
        .with_batch(Vec::new())
        .with_batch(vec![kafka_message(1, encoded("k2"))]);
    let amqp = FakeDeliveryStream::new()
        .with_binary(encoded("a1"))
        .with_error(IngestError::Amqp("broker 关闭了连接".to_string()));
    let amqp_closed = amqp.closed_flag();

    let primary = PullLoop::new(kafka, sink.clone(), &ingest());
    let background = PushLoop::new(amqp, sink.clone(), AckPolicy::Always, "fraud-detection-orders");

    let report = Supervisor::new(
        Box::new(primary),
        Box::new(background),
        ingest().shutdown_grace(),
    )
    .run(until_sink_has(sink.clone(), 3))
    .await
    .unwrap();

    assert_eq!(report.consumed, 2);
    assert!(amqp_closed.load(Ordering::SeqCst));
    assert!(sink.order_ids().contains(&"a1".to_string()));
}

#[test]
fn test_missing_kafka_address_is_reported_before_anything_else() {
    let err = AppConfig::load_with("fraud-detection-service", |_| None).unwrap_err();

    assert_eq!(err.code(), "MISSING_ENV");
    assert!(err.to_string().contains(KAFKA_ADDR_ENV));
}

#[test]
fn test_defaults_match_the_order_pipeline() {
    let config = AppConfig::load_with("fraud-detection-service", |key| match key {
        "KAFKA_SERVICE_ADDR" => Some("kafka:9092".to_string()),
        "AMQP_SERVICE_ADDR" => Some("rabbitmq:5672".to_string()),
        "CONFIG_DIR" => Some("/nonexistent".to_string()),
        _ => None,
    })
    .unwrap();

    assert_eq!(config.kafka.topic, topics::ORDERS);
    assert_eq!(config.kafka.consumer_group, "frauddetectionservice");
    assert_eq!(config.amqp.queue, "fraud-detection-orders");
    assert_eq!(config.ingest.poll_timeout(), Duration::from_millis(100));
    assert_eq!(config.ingest.ack_policy, AckPolicy::Always);
}
