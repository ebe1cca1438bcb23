use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::registry::{ModuleRegistry, ModuleStatus};

use super::running_set::RunningSet;

/// 레지스트리 상태 기록과 실행 카운터를 함께 갱신합니다.
///
/// 카운터는 RUNNING 으로 "들어오는" 전이에서만 증가하고 RUNNING 에서 "나가는"
/// 전이에서만 감소하므로, 같은 상태를 두 번 기록해도 중복 집계되지 않습니다.
pub struct StatusLedger {
    registry: Arc<dyn ModuleRegistry>,
    running: RunningSet,
    gate: Mutex<()>,
}

impl StatusLedger {
    /// 재검증 작업이 ledger 를 약한 참조로 가리킬 수 있도록 순환 생성
    pub fn new_cyclic<F>(registry: Arc<dyn ModuleRegistry>, build_running: F) -> Arc<Self>
    where
        F: FnOnce(&Weak<StatusLedger>) -> RunningSet,
    {
        Arc::new_cyclic(|weak| Self {
            registry,
            running: build_running(weak),
            gate: Mutex::new(()),
        })
    }

    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|e| {
            tracing::error!("[Ledger] Gate lock poisoned, recovering");
            e.into_inner()
        })
    }

    pub fn registry(&self) -> &Arc<dyn ModuleRegistry> {
        &self.registry
    }

    pub fn running_set(&self) -> &RunningSet {
        &self.running
    }

    /// 상태를 기록하고 이전 상태를 반환
    pub fn apply(&self, module: &str, status: ModuleStatus) -> Option<ModuleStatus> {
        let _gate = self.lock_gate();
        let previous = self.registry.set_status(module, status);
        self.adjust_counter(previous, status);
        previous
    }

    /// 현재 상태가 `expected` 일 때만 기록. 다른 요청이 먼저 상태를 바꿨으면 false.
    pub fn apply_if(&self, module: &str, expected: ModuleStatus, status: ModuleStatus) -> bool {
        let _gate = self.lock_gate();
        let current = self.registry.get(module).map(|m| m.status);
        if current != Some(expected) {
            tracing::debug!(
                "[Ledger] '{}' is {:?}, not {}; skipping update to {}",
                module,
                current,
                expected,
                status
            );
            return false;
        }
        let previous = self.registry.set_status(module, status);
        self.adjust_counter(previous, status);
        true
    }

    fn adjust_counter(&self, previous: Option<ModuleStatus>, status: ModuleStatus) {
        let was_running = previous == Some(ModuleStatus::Running);
        let now_running = status == ModuleStatus::Running;
        match (was_running, now_running) {
            (false, true) => self.running.increment(),
            (true, false) => self.running.decrement(),
            _ => {}
        }
    }
}
