//! 실행 중인 모듈 수를 세고, 0 ↔ 1 경계에서 재검증 타이머와 wake lock 을 켜고 끕니다.
//!
//! 카운터, 타이머 핸들, wake lock 은 하나의 Mutex 안에서만 함께 바뀝니다.
//! "타이머가 살아 있음 ⇔ count > 0" 이 항상 성립합니다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use super::scheduler::{PeriodicJob, ScheduledTask, Scheduler};
use super::wake_lock::ExclusiveResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunningSnapshot {
    pub count: usize,
    pub timer_active: bool,
    pub wake_lock_enabled: bool,
    pub wake_lock_held: bool,
}

struct RunningState {
    count: usize,
    timer: Option<Box<dyn ScheduledTask>>,
}

pub struct RunningSet {
    state: Mutex<RunningState>,
    scheduler: Arc<dyn Scheduler>,
    wake_lock: Arc<dyn ExclusiveResource>,
    wake_lock_enabled: AtomicBool,
    job: PeriodicJob,
    initial_delay: Duration,
    period: Duration,
}

impl RunningSet {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        wake_lock: Arc<dyn ExclusiveResource>,
        wake_lock_enabled: bool,
        job: PeriodicJob,
        initial_delay: Duration,
        period: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(RunningState {
                count: 0,
                timer: None,
            }),
            scheduler,
            wake_lock,
            wake_lock_enabled: AtomicBool::new(wake_lock_enabled),
            job,
            initial_delay,
            period,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunningState> {
        self.state.lock().unwrap_or_else(|e| {
            tracing::error!("[RunningSet] State lock poisoned, recovering");
            e.into_inner()
        })
    }

    pub fn increment(&self) {
        let mut state = self.lock_state();
        if state.count == 0 {
            if let Some(stale) = state.timer.take() {
                stale.cancel();
            }
            state.timer = Some(self.scheduler.schedule(
                self.initial_delay,
                self.period,
                self.job.clone(),
            ));
            if self.wake_lock_enabled() {
                if let Err(e) = self.wake_lock.acquire() {
                    tracing::error!("[RunningSet] Could not acquire wake lock: {}", e);
                }
            }
        }
        state.count += 1;
        tracing::debug!("[RunningSet] count -> {}", state.count);
    }

    /// 0 에서의 decrement 는 경고 후 무시
    pub fn decrement(&self) {
        let mut state = self.lock_state();
        if state.count == 0 {
            tracing::warn!("[RunningSet] decrement with nothing running, ignored");
            return;
        }
        state.count -= 1;
        tracing::debug!("[RunningSet] count -> {}", state.count);
        if state.count == 0 {
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            if self.wake_lock.is_held() {
                if let Err(e) = self.wake_lock.release() {
                    tracing::error!("[RunningSet] Could not release wake lock: {}", e);
                }
            }
        }
    }

    /// 실행 중에 바뀌면 즉시 반영
    pub fn set_wake_lock_enabled(&self, enabled: bool) {
        let state = self.lock_state();
        self.wake_lock_enabled.store(enabled, Ordering::SeqCst);
        if state.count == 0 {
            return;
        }
        let result = if enabled {
            self.wake_lock.acquire()
        } else {
            self.wake_lock.release()
        };
        if let Err(e) = result {
            tracing::error!("[RunningSet] Could not apply wake lock setting: {}", e);
        }
    }

    pub fn wake_lock_enabled(&self) -> bool {
        self.wake_lock_enabled.load(Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.lock_state().count
    }

    pub fn snapshot(&self) -> RunningSnapshot {
        let state = self.lock_state();
        RunningSnapshot {
            count: state.count,
            timer_active: state.timer.as_ref().is_some_and(|t| !t.is_cancelled()),
            wake_lock_enabled: self.wake_lock_enabled(),
            wake_lock_held: self.wake_lock.is_held(),
        }
    }

    /// 종료 시 호출: 카운터를 0 으로 되돌리고 자원을 반납
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.count = 0;
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        if let Err(e) = self.wake_lock.release() {
            tracing::error!("[RunningSet] Could not release wake lock: {}", e);
        }
    }
}
