//! 定期収集タスク
//!
//! 状態は Idle / Running の2つ。`start` で Running に遷移し、`stop` で
//! 以降のティックをキャンセルする。実行中のアクションは中断しない。

use crate::error::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 初回実行のタイミング
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// 開始直後に1回実行し、以降は間隔ごと
    Immediate,
    /// 最初の間隔が経過してから実行
    AfterInterval,
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct CollectorState {
    /// ティック開始とキャンセルを直列化するゲート
    gate: Mutex<()>,
    running: Mutex<Option<RunningTask>>,
    ticks: AtomicU64,
    failures: AtomicU64,
}

/// 定期収集タスク
///
/// クローンは同じタスクを指す。
#[derive(Clone)]
pub struct PeriodicCollector {
    name: Arc<str>,
    state: Arc<CollectorState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PeriodicCollector {
    /// 新しいコレクターを作成（Idle 状態）
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            state: Arc::new(CollectorState::default()),
        }
    }

    /// タスク名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 定期実行を開始
    ///
    /// 既に実行中の場合は `AlreadyRunning` を返す。
    pub fn start<F, Fut>(&self, interval: Duration, policy: StartPolicy, action: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(TelemetryError::InvalidInput(format!(
                "collector '{}' interval must be greater than zero",
                self.name
            )));
        }

        let mut running = lock(&self.state.running);
        if let Some(task) = running.as_ref() {
            if !task.handle.is_finished() && !task.token.is_cancelled() {
                return Err(TelemetryError::AlreadyRunning(self.name.to_string()));
            }
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.name),
            Arc::clone(&self.state),
            token.clone(),
            interval,
            policy,
            action,
        ));

        *running = Some(RunningTask { token, handle });
        info!(task = %self.name, ?interval, ?policy, "Periodic collector started");
        Ok(())
    }

    /// 定期実行を停止
    ///
    /// ティックは `ticks()` に数えられた時点で開始済みとみなす。戻った後に
    /// 新しいティックが数えられることはなく、数えられなかったティックの
    /// アクションは実行されない。実行中のアクションは完了まで走り続けるが、
    /// その完了は待たない。
    pub fn stop(&self) -> Result<()> {
        let task = lock(&self.state.running)
            .take()
            .ok_or_else(|| TelemetryError::NotRunning(self.name.to_string()))?;

        {
            let _gate = lock(&self.state.gate);
            task.token.cancel();
        }

        info!(task = %self.name, "Periodic collector stopped");
        Ok(())
    }

    /// 停止して実行中のアクションの完了を待つ
    pub async fn shutdown(&self) -> Result<()> {
        let task = lock(&self.state.running)
            .take()
            .ok_or_else(|| TelemetryError::NotRunning(self.name.to_string()))?;

        {
            let _gate = lock(&self.state.gate);
            task.token.cancel();
        }

        if let Err(e) = task.handle.await {
            warn!(task = %self.name, "Collector loop ended abnormally: {}", e);
        }
        info!(task = %self.name, "Periodic collector shut down");
        Ok(())
    }

    /// 実行中か
    pub fn is_running(&self) -> bool {
        lock(&self.state.running)
            .as_ref()
            .is_some_and(|task| !task.token.is_cancelled() && !task.handle.is_finished())
    }

    /// 開始されたティック数（キャンセル判定を通過したもの）
    pub fn ticks(&self) -> u64 {
        self.state.ticks.load(Ordering::Acquire)
    }

    /// 失敗したティック数
    pub fn failures(&self) -> u64 {
        self.state.failures.load(Ordering::Acquire)
    }
}

async fn run_loop<F, Fut>(
    name: Arc<str>,
    state: Arc<CollectorState>,
    token: CancellationToken,
    period: Duration,
    policy: StartPolicy,
    action: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let start = match policy {
        StartPolicy::Immediate => Instant::now(),
        StartPolicy::AfterInterval => Instant::now() + period,
    };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if token.is_cancelled() {
            break;
        }

        // ティックの開始判定は実際に実行されるタスク側で行う
        let tick = action();
        let begin = {
            let state = Arc::clone(&state);
            let token = token.clone();
            async move {
                {
                    let _gate = lock(&state.gate);
                    if token.is_cancelled() {
                        return None;
                    }
                    state.ticks.fetch_add(1, Ordering::AcqRel);
                }
                Some(tick.await)
            }
        };

        // アクションのパニックでスケジュールを止めない
        match tokio::spawn(begin).await {
            Ok(None) => {
                debug!(task = %name, "Collector tick skipped after stop");
                break;
            }
            Ok(Some(Ok(()))) => debug!(task = %name, "Collector tick completed"),
            Ok(Some(Err(e))) => {
                state.failures.fetch_add(1, Ordering::AcqRel);
                warn!(task = %name, "Collector tick failed: {}", e);
            }
            Err(e) => {
                state.failures.fetch_add(1, Ordering::AcqRel);
                error!(task = %name, "Collector tick panicked: {}", e);
            }
        }
    }

    debug!(task = %name, "Collector loop exited");
}
