//! 欺诈检测订单消费服务
//!
//! 同时消费 Kafka 与 AMQP 两路订单事件并输出结构化日志。

use std::sync::Arc;

use anyhow::Result;
use fraud_detection_service::amqp_subscriber::AmqpSubscriber;
use fraud_detection_service::kafka_subscriber::KafkaSubscriber;
use fraud_detection_service::sink::{EventSink, LogSink};
use fraud_detection_service::supervisor::Supervisor;
use fraud_shared::config::AppConfig;
use fraud_shared::observability;
use tokio::signal;
use tracing::{error, info};

const SERVICE_NAME: &str = "fraud-detection-service";

#[tokio::main]
async fn main() -> Result<()> {
    // broker 地址缺失时在建立任何连接之前退出
    let config = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => config,
        Err(e) => {
            println!("{e}");
            std::process::exit(1);
        }
    };

    let _guard = observability::init(&config.observability)?;

    info!(
        environment = %config.environment,
        kafka_brokers = %config.kafka.brokers,
        amqp = %config.amqp.redacted_uri(),
        "Starting fraud-detection-service..."
    );

    let sink: Arc<dyn EventSink> = Arc::new(LogSink);
    let kafka = KafkaSubscriber::new(config.kafka.clone(), config.ingest.clone(), sink.clone());
    let amqp = AmqpSubscriber::new(config.amqp.clone(), config.ingest.clone(), sink);

    Supervisor::new(
        Box::new(kafka),
        Box::new(amqp),
        config.ingest.shutdown_grace(),
    )
    .run(shutdown_signal())
    .await?;

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "安装 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "安装 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
