//! 주기 작업 스케줄러: 재검증 타이머를 띄우고 취소합니다.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// 매 tick 마다 호출되는 작업
pub type PeriodicJob = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// 예약된 작업 핸들
pub trait ScheduledTask: Send {
    /// 다음 tick 부터 실행되지 않음. 진행 중인 tick 은 끝까지 실행됩니다.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

pub trait Scheduler: Send + Sync {
    fn schedule(
        &self,
        initial_delay: Duration,
        period: Duration,
        job: PeriodicJob,
    ) -> Box<dyn ScheduledTask>;
}

/// tokio 런타임 위에서 fixed-delay 로 반복
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// 현재 런타임 사용. 런타임 밖에서 호출하면 None.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(
        &self,
        initial_delay: Duration,
        period: Duration,
        job: PeriodicJob,
    ) -> Box<dyn ScheduledTask> {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        self.handle.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }
            loop {
                // 취소는 sleep 지점에서만 관찰: tick 도중 자기 자신을 취소해도 tick 은 완주
                job().await;
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            tracing::debug!("[Scheduler] Periodic task finished");
        });

        tracing::info!(
            "[Scheduler] Periodic task scheduled (delay {:?}, every {:?})",
            initial_delay,
            period
        );
        Box::new(TokioTask { token })
    }
}

struct TokioTask {
    token: CancellationToken,
}

impl ScheduledTask for TokioTask {
    fn cancel(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
            tracing::info!("[Scheduler] Periodic task cancelled");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TokioTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
