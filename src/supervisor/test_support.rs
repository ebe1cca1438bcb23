//! 단위 테스트용 가짜 협력자

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::notify::{Notice, NotificationSink};
use crate::process_monitor::{ProbeError, ProcessTable};

use super::scheduler::{PeriodicJob, ScheduledTask, Scheduler};

struct ManualTask {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask for ManualTask {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 시간 대신 `fire()` 로 tick 을 구동
#[derive(Default)]
pub struct ManualScheduler {
    scheduled: AtomicUsize,
    jobs: Mutex<Vec<(Arc<AtomicBool>, PeriodicJob)>>,
}

impl ManualScheduler {
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }

    pub fn live_count(&self) -> usize {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|(cancelled, _)| !cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// 살아 있는 작업마다 한 번씩 tick
    pub async fn fire(&self) {
        let live: Vec<PeriodicJob> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|(cancelled, _)| !cancelled.load(Ordering::SeqCst))
            .map(|(_, job)| job.clone())
            .collect();
        for job in live {
            job().await;
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, _: Duration, _: Duration, job: PeriodicJob) -> Box<dyn ScheduledTask> {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.jobs.lock().unwrap().push((cancelled.clone(), job));
        Box::new(ManualTask { cancelled })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock().unwrap())
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// 이름 → pid 목록을 테스트에서 바꿀 수 있는 프로세스 테이블
#[derive(Default)]
pub struct FakeTable {
    pids: Mutex<HashMap<String, Vec<u32>>>,
    broken: AtomicBool,
}

impl FakeTable {
    pub fn set(&self, name: &str, pids: &[u32]) {
        self.pids.lock().unwrap().insert(name.to_string(), pids.to_vec());
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }
}

impl ProcessTable for FakeTable {
    fn pids_of(&self, name: &str) -> Result<Vec<u32>, ProbeError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ProbeError::QueryFailed("process table unavailable".into()));
        }
        Ok(self.pids.lock().unwrap().get(name).cloned().unwrap_or_default())
    }
}
