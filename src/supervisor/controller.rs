//! 모듈 시작/정지 처리. 요청은 worker 가 하나씩 순서대로 넘겨줍니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{StapConfig, TimingConfig};
use crate::notify::{Notice, NotificationSink};
use crate::registry::{is_valid_module_name, ModuleStatus};

use super::error::SupervisorError;
use super::ledger::StatusLedger;
use super::privileged::{CommandRunner, INPUT_TERMINATOR};
use super::reconcile::StatusChecker;
use super::state_machine::{Phase, RequestKind, StateMachine};

/// 출력 파일 이름에 붙는 타임스탬프 형식
pub const OUTPUT_TIMESTAMP_FORMAT: &str = "%Y.%m.%d_%H.%M.%S";

pub struct LifecycleController {
    config: Arc<StapConfig>,
    runner: Arc<dyn CommandRunner>,
    checker: Arc<StatusChecker>,
    ledger: Arc<StatusLedger>,
    notifier: Arc<dyn NotificationSink>,
}

impl LifecycleController {
    pub fn new(
        config: Arc<StapConfig>,
        runner: Arc<dyn CommandRunner>,
        checker: Arc<StatusChecker>,
        ledger: Arc<StatusLedger>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            runner,
            checker,
            ledger,
            notifier,
        }
    }

    /// 시작 스크립트 입력
    pub fn start_input(&self, module: &str) -> Vec<String> {
        let paths = &self.config.paths;
        let stamp = chrono::Local::now().format(OUTPUT_TIMESTAMP_FORMAT);
        vec![
            format!("modulename={}", module),
            format!("moduledir={}", paths.modules_dir.display()),
            format!("outputname={}_{}", module, stamp),
            format!("outputdir={}", paths.output_dir.display()),
            format!("logdir={}", paths.log_dir.display()),
            format!("rundir={}", paths.run_dir.display()),
            format!("stapdir={}", paths.support_dir.display()),
            INPUT_TERMINATOR.to_string(),
        ]
    }

    /// 정지 스크립트 입력
    pub fn stop_input(&self, pid: u32) -> Vec<String> {
        vec![
            format!("pid={}", pid),
            format!("busyboxdir={}", self.config.paths.support_dir.display()),
            INPUT_TERMINATOR.to_string(),
        ]
    }

    pub async fn start(&self, module: &str) -> Result<ModuleStatus, SupervisorError> {
        let mut request = StateMachine::new(RequestKind::Start, module);
        if !is_valid_module_name(module) {
            request.advance(Phase::Rejected);
            return Err(SupervisorError::InvalidModuleName(module.to_string()));
        }

        let module_file = self.config.module_path(module);
        if !module_file.is_file() {
            tracing::error!("[Lifecycle] No such module {} ({})", module, module_file.display());
            request.advance(Phase::Rejected);
            self.notifier.notify(Notice::ModuleMissing {
                module: module.to_string(),
            });
            return Err(SupervisorError::ModuleNotFound(module.to_string()));
        }

        self.ledger.registry().get_or_create(module);

        let input = self.start_input(module);
        let script = self.config.start_script().display().to_string();
        request.advance(Phase::ScriptInvoked);
        let outcome = self.runner.run(&script, &input).await;
        if !outcome.success() {
            tracing::error!("[Lifecycle] Could not start '{}' (exit {})", module, outcome.exit_code);
            request.advance(Phase::ScriptFailed);
            self.notifier.notify(Notice::StartFailed {
                module: module.to_string(),
            });
            self.ledger.apply(module, ModuleStatus::Crashed);
            return Err(SupervisorError::CommandFailed {
                module: module.to_string(),
                exit_code: outcome.exit_code,
            });
        }

        let grace = Duration::from_millis(self.config.timing.start_grace_ms);
        let status = self.await_status(&mut request, true, grace).await;
        request.advance(Phase::Settled(status));
        self.ledger.apply(module, status);

        if status == ModuleStatus::Running {
            tracing::info!("[Lifecycle] Module '{}' started", module);
        } else {
            self.notifier.notify(Notice::Crashed {
                module: module.to_string(),
            });
        }
        Ok(status)
    }

    pub async fn stop(&self, module: &str) -> Result<ModuleStatus, SupervisorError> {
        let mut request = StateMachine::new(RequestKind::Stop, module);
        if !is_valid_module_name(module) {
            request.advance(Phase::Rejected);
            return Err(SupervisorError::InvalidModuleName(module.to_string()));
        }

        let pid_file = self.checker.pid_file(module);
        if !pid_file.exists() {
            tracing::error!(
                "[Lifecycle] Could not stop module - selected module ({}) is not running",
                module
            );
            request.advance(Phase::Rejected);
            self.notifier.notify(Notice::NotRunning {
                module: module.to_string(),
            });
            return Err(SupervisorError::NotRunning(module.to_string()));
        }

        let pid = match pid_file.read_pid() {
            Ok(pid) => pid,
            Err(e) => {
                tracing::error!("[Lifecycle] Could not read pid of '{}': {}", module, e);
                request.advance(Phase::Rejected);
                self.notifier.notify(Notice::StopFailed {
                    module: module.to_string(),
                });
                return Err(SupervisorError::PidFile {
                    module: module.to_string(),
                    source: e,
                });
            }
        };

        let input = self.stop_input(pid);
        let script = self.config.kill_script().display().to_string();
        request.advance(Phase::ScriptInvoked);
        let outcome = self.runner.run(&script, &input).await;
        if !outcome.success() {
            tracing::error!(
                "[Lifecycle] Could not run kill script ({}, exit {})",
                module,
                outcome.exit_code
            );
            request.advance(Phase::ScriptFailed);
            self.notifier.notify(Notice::StopFailed {
                module: module.to_string(),
            });
            return Err(SupervisorError::CommandFailed {
                module: module.to_string(),
                exit_code: outcome.exit_code,
            });
        }

        let grace = Duration::from_millis(self.config.timing.stop_grace_ms);
        let status = self.await_status(&mut request, false, grace).await;
        request.advance(Phase::Settled(status));
        self.ledger.apply(module, status);

        match status {
            ModuleStatus::Stopped => tracing::info!("[Lifecycle] Module '{}' stopped", module),
            ModuleStatus::Running => self.notifier.notify(Notice::StillRunning {
                module: module.to_string(),
            }),
            ModuleStatus::Crashed => self.notifier.notify(Notice::Crashed {
                module: module.to_string(),
            }),
        }
        Ok(status)
    }

    /// grace 후 목표 상태가 될 때까지 지수 backoff 로 재확인. 마감 시각까지 안 되면 마지막 결과.
    ///
    /// 중간 확인은 읽기만 하고, pid 파일 삭제는 마지막 확인에서만 적용합니다.
    async fn await_status(
        &self,
        request: &mut StateMachine,
        desired_running: bool,
        grace: Duration,
    ) -> ModuleStatus {
        let module = request.module.clone();
        let target = if desired_running {
            ModuleStatus::Running
        } else {
            ModuleStatus::Stopped
        };
        request.advance(Phase::GraceWait);
        tokio::time::sleep(grace).await;
        request.advance(Phase::Probed);

        let timing = &self.config.timing;
        let deadline = Instant::now() + Duration::from_millis(timing.readiness_deadline_ms);
        let mut delays = Backoff::new(timing);
        let mut attempt = 1u32;
        loop {
            let (evidence, resolution) =
                self.checker.inspect_async(&module, desired_running).await;
            let now = Instant::now();
            if resolution.status == target || now >= deadline {
                tracing::debug!(
                    "[Lifecycle] '{}' settled as {} after {} probe(s)",
                    module,
                    resolution.status,
                    attempt
                );
                return self.checker.settle(&module, &evidence, &resolution);
            }
            tracing::trace!(
                "[Lifecycle] '{}' not yet {} ({:?}), retrying",
                module,
                target,
                evidence
            );
            let delay = delays.next_delay().min(deadline - now);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// 재확인 간격: base, 2×base, 4×base … max 에서 고정
struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    fn new(timing: &TimingConfig) -> Self {
        let max = Duration::from_millis(timing.readiness_backoff_max_ms);
        Self {
            next: Duration::from_millis(timing.readiness_backoff_ms).min(max),
            max,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = (self.next * 2).min(self.max);
        current
    }
}
