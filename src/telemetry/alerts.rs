//! 閾値アラート配信
//!
//! `record` で閾値超過を検知すると [`AlertEvent`] を有界キューへ投入し、
//! 専用のディスパッチタスクがハンドラーを呼び出す。記録側はハンドラーの
//! 完了を待たない。

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// 既定のアラートキュー容量
pub const DEFAULT_ALERT_QUEUE_CAPACITY: usize = 1024;

/// アラート発火モード
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertMode {
    /// 閾値を超えるサンプルごとに発火
    #[default]
    Level,
    /// 非アラート→アラートへの遷移時のみ発火
    Edge,
}

/// アラートイベント
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    /// イベントID
    pub id: String,
    /// メトリクス名
    pub metric: String,
    /// 記録された値
    pub value: f64,
    /// 閾値
    pub threshold: f64,
    /// タイムスタンプ
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    /// 新しいアラートイベントを作成
    pub fn new(
        metric: impl Into<String>,
        value: f64,
        threshold: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metric: metric.into(),
            value,
            threshold,
            timestamp,
        }
    }
}

/// アラート通知先
#[async_trait]
pub trait AlertHandler: Send + Sync {
    /// アラートを処理
    async fn on_alert(&self, event: &AlertEvent) -> Result<()>;
}

/// クロージャをハンドラーとして使うためのラッパー
pub struct FnAlertHandler<F>(pub F);

#[async_trait]
impl<F> AlertHandler for FnAlertHandler<F>
where
    F: Fn(&AlertEvent) + Send + Sync,
{
    async fn on_alert(&self, event: &AlertEvent) -> Result<()> {
        (self.0)(event);
        Ok(())
    }
}

/// ログに出力するだけのハンドラー
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertHandler;

#[async_trait]
impl AlertHandler for LogAlertHandler {
    async fn on_alert(&self, event: &AlertEvent) -> Result<()> {
        warn!(
            metric = %event.metric,
            value = event.value,
            threshold = event.threshold,
            "Metric crossed alert threshold"
        );
        Ok(())
    }
}

type SharedHandler = Arc<RwLock<Option<Arc<dyn AlertHandler>>>>;
type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<AlertEvent>>>;

/// アラートディスパッチャー
pub struct AlertDispatcher {
    handler: SharedHandler,
    sender: mpsc::Sender<AlertEvent>,
    receiver: SharedReceiver,
    worker: Mutex<Option<JoinHandle<()>>>,
    active: AtomicBool,
    queued: AtomicU64,
    dropped: AtomicU64,
}

impl AlertDispatcher {
    /// 新しいディスパッチャーを作成
    ///
    /// ワーカータスクはハンドラー設定時に、それを呼んだランタイム上で
    /// 起動するため、ここではランタイムを必要としない。
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            handler: Arc::new(RwLock::new(None)),
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            worker: Mutex::new(None),
            active: AtomicBool::new(false),
            queued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// ハンドラーを設定（差し替え）
    ///
    /// ワーカーが動いていなければ（初回や、起動したランタイムが終了した後）
    /// 呼び出し元のランタイム上で起動し直す。キューは引き継がれる。
    pub async fn set_handler(&self, handler: Arc<dyn AlertHandler>) {
        {
            let mut current = self.handler.write().await;
            *current = Some(handler);
        }
        self.spawn_worker();
        self.active.store(true, Ordering::Release);
    }

    /// ハンドラーを解除
    pub async fn clear_handler(&self) {
        self.active.store(false, Ordering::Release);
        let mut current = self.handler.write().await;
        *current = None;
    }

    /// ハンドラーが設定されているか
    pub fn has_handler(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// イベントをキューへ投入（ブロックしない）
    ///
    /// 投入できた場合に true を返す。ハンドラー未設定なら何もしない。
    pub fn dispatch(&self, event: AlertEvent) -> bool {
        if !self.has_handler() {
            debug!(metric = %event.metric, "No alert handler configured, skipping");
            return false;
        }

        match self.sender.try_send(event) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(metric = %event.metric, "Alert queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(metric = %event.metric, "Alert worker stopped, dropping event");
                false
            }
        }
    }

    /// キュー投入済みアラート数
    pub fn alerts_fired(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// 破棄されたアラート数
    pub fn alerts_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn spawn_worker(&self) {
        let mut worker = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let receiver = Arc::clone(&self.receiver);
        let handler = Arc::clone(&self.handler);
        *worker = Some(tokio::spawn(async move {
            // タスクが破棄されるとロックも解放され、次のワーカーが受信を引き継ぐ
            let mut receiver = receiver.lock().await;
            while let Some(event) = receiver.recv().await {
                let current = handler.read().await.clone();
                let Some(current) = current else {
                    continue;
                };

                let metric = event.metric.clone();
                // ハンドラーのパニックをワーカーに波及させない
                let delivery = tokio::spawn(async move { current.on_alert(&event).await });
                match delivery.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(metric = %metric, "Alert handler failed: {}", e),
                    Err(e) => error!(metric = %metric, "Alert handler panicked: {}", e),
                }
            }
            debug!("Alert dispatcher worker exited");
        }));
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn event(value: f64) -> AlertEvent {
        AlertEvent::new("cpu", value, 80.0, Utc::now())
    }

    #[tokio::test]
    async fn test_dispatch_without_handler_is_noop() {
        let dispatcher = AlertDispatcher::new(4);
        assert!(!dispatcher.dispatch(event(90.0)));
        assert_eq!(dispatcher.alerts_fired(), 0);
        assert_eq!(dispatcher.alerts_dropped(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_delivers_to_handler() {
        let dispatcher = AlertDispatcher::new(4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher
            .set_handler(Arc::new(FnAlertHandler(move |e: &AlertEvent| {
                let _ = tx.send(e.value);
            })))
            .await;

        assert!(dispatcher.dispatch(event(91.0)));

        let value = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 91.0);
        assert_eq!(dispatcher.alerts_fired(), 1);
    }

    struct BlockingHandler {
        started: mpsc::UnboundedSender<()>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl AlertHandler for BlockingHandler {
        async fn on_alert(&self, _event: &AlertEvent) -> Result<()> {
            let _ = self.started.send(());
            let _permit = self.gate.acquire().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let dispatcher = AlertDispatcher::new(1);
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        dispatcher
            .set_handler(Arc::new(BlockingHandler {
                started: started_tx,
                gate: Arc::clone(&gate),
            }))
            .await;

        // 1件目はハンドラー内でブロックさせる
        assert!(dispatcher.dispatch(event(90.0)));
        started_rx.recv().await.unwrap();

        // 2件目はキューに残り、3件目は破棄される
        assert!(dispatcher.dispatch(event(91.0)));
        assert!(!dispatcher.dispatch(event(92.0)));
        assert_eq!(dispatcher.alerts_dropped(), 1);

        gate.add_permits(2);
    }

    #[tokio::test]
    async fn test_clear_handler_stops_delivery() {
        let dispatcher = AlertDispatcher::new(4);
        dispatcher.set_handler(Arc::new(LogAlertHandler)).await;
        assert!(dispatcher.has_handler());

        dispatcher.clear_handler().await;
        assert!(!dispatcher.has_handler());
        assert!(!dispatcher.dispatch(event(99.0)));
    }

    struct PanickingHandler;

    #[async_trait]
    impl AlertHandler for PanickingHandler {
        async fn on_alert(&self, _event: &AlertEvent) -> Result<()> {
            panic!("handler bug");
        }
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_handler() {
        let dispatcher = AlertDispatcher::new(4);
        dispatcher.set_handler(Arc::new(PanickingHandler)).await;
        assert!(dispatcher.dispatch(event(90.0)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher
            .set_handler(Arc::new(FnAlertHandler(move |e: &AlertEvent| {
                let _ = tx.send(e.value);
            })))
            .await;
        assert!(dispatcher.dispatch(event(95.0)));

        let value = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 95.0);
    }

    #[tokio::test]
    async fn test_worker_restarts_after_its_runtime_is_dropped() {
        let dispatcher = Arc::new(AlertDispatcher::new(4));

        // 別ランタイムでハンドラーを設定し、そのランタイムを終了させる
        let other = Arc::clone(&dispatcher);
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(other.set_handler(Arc::new(LogAlertHandler)));
        })
        .join()
        .unwrap();

        // ワーカー不在の間に投入されたイベントもキューに残る
        assert!(dispatcher.dispatch(event(90.0)));

        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher
            .set_handler(Arc::new(FnAlertHandler(move |e: &AlertEvent| {
                let _ = tx.send(e.value);
            })))
            .await;
        assert!(dispatcher.dispatch(event(93.0)));

        for expected in [90.0, 93.0] {
            let value = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(value, expected);
        }
        assert_eq!(dispatcher.alerts_dropped(), 0);
    }
}
