pub mod controller;
pub mod error;
pub mod ledger;
pub mod liveness;
pub mod pid_file;
pub mod privileged;
pub mod reconcile;
pub mod revalidate;
pub mod running_set;
pub mod scheduler;
pub mod state_machine;
pub mod wake_lock;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use crate::config::{ProbeBackend, StapConfig};
use crate::notify::{BroadcastNotifier, Notice, NotificationSink};
use crate::process_monitor::{PidofProcessTable, ProcessTable, SysinfoProcessTable};
use crate::registry::{is_valid_module_name, InMemoryRegistry, Module, ModuleRegistry, ModuleStatus};

use controller::LifecycleController;
pub use error::SupervisorError;
use ledger::StatusLedger;
use liveness::LivenessProbe;
use privileged::{escalator_for, CommandRunner, PrivilegedRunner};
use reconcile::StatusChecker;
use revalidate::Revalidator;
use running_set::{RunningSet, RunningSnapshot};
use scheduler::{Scheduler, TokioScheduler};
use wake_lock::{ExclusiveResource, SysfsWakeLock};
pub use worker::{ModuleRequest, WorkerStatus};
use worker::RequestWorker;

/// 외부 시스템과 닿는 협력자 묶음: 테스트에서는 가짜로 교체
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub process_table: Arc<dyn ProcessTable>,
    pub scheduler: Arc<dyn Scheduler>,
    pub wake_lock: Arc<dyn ExclusiveResource>,
    pub registry: Arc<dyn ModuleRegistry>,
    pub notifier: Arc<dyn NotificationSink>,
}

pub struct Supervisor {
    config: Arc<StapConfig>,
    checker: Arc<StatusChecker>,
    ledger: Arc<StatusLedger>,
    worker: RequestWorker,
    notices: Option<Arc<BroadcastNotifier>>,
}

impl Supervisor {
    /// tokio 런타임 안에서 호출해야 합니다 (요청 워커를 spawn).
    pub fn new(config: StapConfig, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let Collaborators {
            runner,
            process_table,
            scheduler,
            wake_lock,
            registry,
            notifier,
        } = collaborators;

        let probe = LivenessProbe::new(process_table, &config.probe.process_name);
        let checker = Arc::new(StatusChecker::new(probe, &config));

        let ledger = StatusLedger::new_cyclic(registry, |weak| {
            let job = Revalidator::new(weak.clone(), checker.clone(), notifier.clone()).into_job();
            RunningSet::new(
                scheduler,
                wake_lock,
                config.wake_lock.enabled,
                job,
                config.timing.timer_initial_delay(),
                config.timing.timer_period(),
            )
        });

        let controller = Arc::new(LifecycleController::new(
            config.clone(),
            runner,
            checker.clone(),
            ledger.clone(),
            notifier,
        ));
        let worker = RequestWorker::spawn(controller);

        Self {
            config,
            checker,
            ledger,
            worker,
            notices: None,
        }
    }

    /// 실제 시스템 구현으로 구성
    pub fn from_config(config: StapConfig) -> Result<Self> {
        let scheduler =
            TokioScheduler::current().context("Supervisor must be created inside a tokio runtime")?;

        let process_table: Arc<dyn ProcessTable> = match config.probe.backend {
            ProbeBackend::Sysinfo => Arc::new(SysinfoProcessTable),
            ProbeBackend::Pidof => Arc::new(PidofProcessTable::new(config.busybox_path())),
        };
        let runner = Arc::new(PrivilegedRunner::new(escalator_for(&config)));
        let wake_lock = Arc::new(SysfsWakeLock::new(&config.wake_lock));
        let notices = Arc::new(BroadcastNotifier::default());

        let collaborators = Collaborators {
            runner,
            process_table,
            scheduler: Arc::new(scheduler),
            wake_lock,
            registry: Arc::new(InMemoryRegistry::new()),
            notifier: notices.clone(),
        };
        let mut supervisor = Self::new(config, collaborators);
        supervisor.notices = Some(notices);
        Ok(supervisor)
    }

    pub fn config(&self) -> &StapConfig {
        &self.config
    }

    /// 작업 디렉토리를 만들고, 이전 실행에서 남은 pid 파일로부터 모듈 상태를 복원
    pub async fn initialize(&self) -> Result<()> {
        let paths = &self.config.paths;
        for dir in [&paths.output_dir, &paths.log_dir, &paths.run_dir] {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!("Could not create directory {}: {}", dir.display(), e);
            }
        }

        let found = pid_file::scan_module_names(&paths.run_dir, &paths.pid_ext)
            .with_context(|| format!("Failed to scan {}", paths.run_dir.display()))?;
        let mut adopted = 0;
        for module in found {
            if !is_valid_module_name(&module) {
                tracing::warn!("Ignoring pid file with unusable module name '{}'", module);
                continue;
            }
            let status = self.checker.check_status_async(&module, true).await;
            self.ledger.apply(&module, status);
            if status == ModuleStatus::Running {
                adopted += 1;
            }
        }
        tracing::info!("Adopted {} running module(s)", adopted);
        Ok(())
    }

    /// 큐에 넣고 바로 반환
    pub async fn request(&self, request: ModuleRequest) -> Result<(), SupervisorError> {
        if !is_valid_module_name(request.module()) {
            return Err(SupervisorError::InvalidModuleName(request.module().to_string()));
        }
        self.worker.submit(request).await
    }

    /// Called by IPC API: POST /api/module/:name/start
    pub async fn start_module(&self, module: &str) -> Result<ModuleStatus, SupervisorError> {
        self.worker
            .submit_and_wait(ModuleRequest::Start {
                module: module.to_string(),
            })
            .await
    }

    /// Called by IPC API: POST /api/module/:name/stop
    pub async fn stop_module(&self, module: &str) -> Result<ModuleStatus, SupervisorError> {
        self.worker
            .submit_and_wait(ModuleRequest::Stop {
                module: module.to_string(),
            })
            .await
    }

    /// 현재 기록된 상태를 기대 상태로 삼아 즉시 재확인.
    /// 레지스트리에 없는 모듈은 결과만 돌려주고 등록하지 않습니다 (모듈은 시작 요청으로만 생성).
    pub async fn check_status(&self, module: &str) -> Result<ModuleStatus, SupervisorError> {
        if !is_valid_module_name(module) {
            return Err(SupervisorError::InvalidModuleName(module.to_string()));
        }
        let known = self.ledger.registry().get(module);
        let desired_running = known
            .as_ref()
            .is_some_and(|m| m.status == ModuleStatus::Running);
        let status = self.checker.check_status_async(module, desired_running).await;
        if known.is_some() {
            self.ledger.apply(module, status);
        }
        Ok(status)
    }

    pub fn modules(&self) -> Vec<Module> {
        self.ledger.registry().list()
    }

    pub fn module(&self, name: &str) -> Option<Module> {
        self.ledger.registry().get(name)
    }

    pub fn running_snapshot(&self) -> RunningSnapshot {
        self.ledger.running_set().snapshot()
    }

    pub fn set_wake_lock_enabled(&self, enabled: bool) {
        self.ledger.running_set().set_wake_lock_enabled(enabled);
    }

    pub async fn worker_status(&self) -> WorkerStatus {
        self.worker.get_status().await
    }

    /// `from_config` 로 만든 경우에만 Some
    pub fn subscribe_notices(&self) -> Option<broadcast::Receiver<Notice>> {
        self.notices.as_ref().map(|n| n.subscribe())
    }

    /// 대기 중인 요청을 마친 뒤 워커를 멈추고 타이머/wake lock 을 반납.
    /// 모듈 프로세스 자체는 건드리지 않습니다.
    pub async fn shutdown(&self) {
        if let Err(e) = self.worker.shutdown().await {
            tracing::warn!("Request worker already stopped: {}", e);
        }
        self.ledger.running_set().reset();
        tracing::info!("Supervisor shut down");
    }
}
