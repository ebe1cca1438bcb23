use std::sync::{Arc, Weak};

use crate::notify::{Notice, NotificationSink};
use crate::registry::ModuleStatus;

use super::ledger::StatusLedger;
use super::reconcile::StatusChecker;
use super::scheduler::PeriodicJob;

/// 주기 재검증: RUNNING 으로 알려진 모듈을 다시 확인해 외부 종료를 감지합니다.
pub struct Revalidator {
    ledger: Weak<StatusLedger>,
    checker: Arc<StatusChecker>,
    notifier: Arc<dyn NotificationSink>,
}

impl Revalidator {
    pub fn new(
        ledger: Weak<StatusLedger>,
        checker: Arc<StatusChecker>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            ledger,
            checker,
            notifier,
        }
    }

    /// tick 한 번. 도중에 마지막 모듈이 빠지면서 타이머가 취소되더라도
    /// 이번 tick 의 나머지 모듈은 모두 확인합니다.
    pub async fn tick(&self) {
        let Some(ledger) = self.ledger.upgrade() else {
            return;
        };
        let modules = ledger.registry().running();
        tracing::debug!("[Revalidate] Checking {} running module(s)", modules.len());

        for module in modules {
            let status = self.checker.check_status_async(&module, true).await;
            if status == ModuleStatus::Running {
                continue;
            }
            if ledger.apply_if(&module, ModuleStatus::Running, status) {
                tracing::warn!("[Revalidate] Module '{}' is no longer running ({})", module, status);
                self.notifier.notify(Notice::Crashed { module });
            }
        }
    }

    pub fn into_job(self) -> PeriodicJob {
        let this = Arc::new(self);
        Arc::new(move || {
            let this = this.clone();
            Box::pin(async move { this.tick().await })
        })
    }
}
