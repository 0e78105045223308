//! 订阅生命周期管理
//!
//! 后台订阅运行在独立的 Tokio 任务中，自身的失败（包括 panic）只记录日志；
//! 主订阅运行在当前任务上，它的结果就是整个服务的结果。
//! 收到进程信号或主订阅退出时，向两路订阅广播关闭并在宽限期内等待它们释放资源。

use std::future::Future;
use std::time::Duration;

use fraud_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::ServiceError;
use crate::subscription::{Subscription, SubscriptionReport};

pub struct Supervisor {
    primary: Box<dyn Subscription>,
    background: Box<dyn Subscription>,
    shutdown_grace: Duration,
}

impl Supervisor {
    pub fn new(
        primary: Box<dyn Subscription>,
        background: Box<dyn Subscription>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            primary,
            background,
            shutdown_grace,
        }
    }

    /// 运行两路订阅直到 `signal` 完成或主订阅退出，返回主订阅的结果
    pub async fn run<F>(self, signal: F) -> Result<SubscriptionReport, ServiceError>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let grace = self.shutdown_grace;

        let background_source = self.background.source();
        let mut background = tokio::spawn(supervise_background(
            self.background,
            shutdown_rx.clone(),
        ));

        let primary_source = self.primary.source();
        let mut primary = self.primary.run(shutdown_rx);
        info!(primary = %primary_source, background = %background_source, "订阅已全部启动");

        let result = tokio::select! {
            result = &mut primary => result,
            () = signal => {
                info!("收到关闭信号，通知订阅退出");
                let _ = shutdown_tx.send(true);
                match tokio::time::timeout(grace, &mut primary).await {
                    Ok(result) => result,
                    Err(_) => Err(ServiceError::ShutdownTimeout(primary_source)),
                }
            }
        };

        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(grace, &mut background).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(source = %background_source, error = %e, "后台订阅任务异常终止"),
            Err(_) => {
                warn!(source = %background_source, "后台订阅未在宽限期内退出，强制终止");
                background.abort();
            }
        }

        match &result {
            Ok(report) => info!(
                source = %report.source,
                consumed = report.consumed,
                decode_failures = report.decode_failures,
                "主订阅已正常退出"
            ),
            Err(e) => {
                metrics::record_subscription_failure(primary_source.as_str());
                error!(source = %primary_source, error = %e, code = e.code(), "主订阅异常退出");
            }
        }

        result
    }
}

/// 运行后台订阅，失败只记录日志
async fn supervise_background(subscription: Box<dyn Subscription>, shutdown: watch::Receiver<bool>) {
    let source = subscription.source();

    match subscription.run(shutdown).await {
        Ok(report) => info!(
            source = %source,
            consumed = report.consumed,
            decode_failures = report.decode_failures,
            skipped = report.skipped,
            "后台订阅已正常退出"
        ),
        Err(e) => {
            metrics::record_subscription_failure(source.as_str());
            error!(source = %source, error = %e, code = e.code(), "后台订阅异常退出，主订阅继续运行");
        }
    }
}
