//! 상태 조정: pid 파일/프로세스 증거와 기대 상태로부터 모듈 상태를 결정합니다.
//!
//! | pid 파일 | pid 유효 | 기대 실행 | 결과 | pid 파일 삭제 |
//! |---|---|---|---|---|
//! | 없음 | – | 예 | CRASHED | 아니오 |
//! | 없음 | – | 아니오 | STOPPED | 아니오 |
//! | 있음 | 예 | 예 | RUNNING | 아니오 |
//! | 있음 | 예 | 아니오 | RUNNING (이상 징후) | 아니오 |
//! | 있음 | 아니오 | 예 | CRASHED | 예 |
//! | 있음 | 아니오 | 아니오 | STOPPED | 예 |
//!
//! 프로세스 조회 실패와 읽을 수 없는 pid 파일은 판단 불가로 보고 기대 상태를
//! 따릅니다 (실행 기대면 CRASHED, 아니면 STOPPED). pid 파일은 남겨 둡니다.
//!
//! [`StatusChecker::inspect`] 는 읽기만 하고, 삭제와 로그는
//! [`StatusChecker::settle`] 에서 한 번만 일어납니다.

use std::sync::Arc;

use super::liveness::LivenessProbe;
use super::pid_file::PidFile;
use crate::config::StapConfig;
use crate::registry::ModuleStatus;

/// 디스크/프로세스 테이블에서 수집한 증거
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    /// pid 파일 없음
    NoPidFile,
    /// pid 파일의 pid 가 살아 있는 프로세스
    Alive { pid: u32 },
    /// pid 파일은 있지만 프로세스 없음
    Stale { pid: u32 },
    /// pid 파일을 읽거나 해석할 수 없음
    Unreadable { reason: String },
    /// 프로세스 테이블 조회 실패
    Indeterminate { pid: u32, reason: String },
}

/// 진단 분류 (로그/알림용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    Healthy,
    CleanlyStopped,
    /// 실행 중이어야 하는데 pid 파일이 없음
    Vanished,
    /// 실행 중이어야 하는데 프로세스가 죽음: stale pid 파일
    CrashedStale,
    /// 정지 후 남은 pid 파일
    LeftoverPidFile,
    /// 정지 요청했는데 아직 살아 있음
    AliveDespiteStop,
    PidFileUnreadable,
    ProbeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub status: ModuleStatus,
    pub delete_pid_file: bool,
    pub diagnosis: Diagnosis,
}

impl Resolution {
    fn new(status: ModuleStatus, delete_pid_file: bool, diagnosis: Diagnosis) -> Self {
        Self {
            status,
            delete_pid_file,
            diagnosis,
        }
    }
}

/// 순수 결정 함수
pub fn resolve(evidence: &Evidence, desired_running: bool) -> Resolution {
    use ModuleStatus::*;
    match (evidence, desired_running) {
        (Evidence::NoPidFile, true) => Resolution::new(Crashed, false, Diagnosis::Vanished),
        (Evidence::NoPidFile, false) => Resolution::new(Stopped, false, Diagnosis::CleanlyStopped),
        (Evidence::Alive { .. }, true) => Resolution::new(Running, false, Diagnosis::Healthy),
        (Evidence::Alive { .. }, false) => {
            Resolution::new(Running, false, Diagnosis::AliveDespiteStop)
        }
        (Evidence::Stale { .. }, true) => Resolution::new(Crashed, true, Diagnosis::CrashedStale),
        (Evidence::Stale { .. }, false) => {
            Resolution::new(Stopped, true, Diagnosis::LeftoverPidFile)
        }
        (Evidence::Unreadable { .. }, desired) => {
            Resolution::new(fallback(desired), false, Diagnosis::PidFileUnreadable)
        }
        (Evidence::Indeterminate { .. }, desired) => {
            Resolution::new(fallback(desired), false, Diagnosis::ProbeFailed)
        }
    }
}

fn fallback(desired_running: bool) -> ModuleStatus {
    if desired_running {
        ModuleStatus::Crashed
    } else {
        ModuleStatus::Stopped
    }
}

/// 표 형태의 입력 (pid 파일 존재, pid 유효, 기대 실행)
pub fn resolve_flags(pid_file_exists: bool, pid_valid: bool, desired_running: bool) -> Resolution {
    let evidence = match (pid_file_exists, pid_valid) {
        (false, _) => Evidence::NoPidFile,
        (true, true) => Evidence::Alive { pid: 0 },
        (true, false) => Evidence::Stale { pid: 0 },
    };
    resolve(&evidence, desired_running)
}

/// 증거를 수집하고 결정 결과의 부수 효과(stale pid 파일 삭제)까지 적용
pub struct StatusChecker {
    probe: LivenessProbe,
    run_dir: std::path::PathBuf,
    pid_ext: String,
}

impl StatusChecker {
    pub fn new(probe: LivenessProbe, config: &StapConfig) -> Self {
        Self {
            probe,
            run_dir: config.paths.run_dir.clone(),
            pid_ext: config.paths.pid_ext.clone(),
        }
    }

    pub fn pid_file(&self, module: &str) -> PidFile {
        PidFile::for_module(&self.run_dir, module, &self.pid_ext)
    }

    pub fn gather(&self, module: &str) -> Evidence {
        let pid_file = self.pid_file(module);
        if !pid_file.exists() {
            return Evidence::NoPidFile;
        }
        let pid = match pid_file.read_pid() {
            Ok(pid) => pid,
            Err(e) => return Evidence::Unreadable { reason: e.to_string() },
        };
        match self.probe.is_alive(pid) {
            Ok(true) => Evidence::Alive { pid },
            Ok(false) => Evidence::Stale { pid },
            Err(e) => Evidence::Indeterminate {
                pid,
                reason: e.to_string(),
            },
        }
    }

    /// 부수 효과 없이 증거와 결정만 계산 (readiness 대기 중의 재확인용)
    pub fn inspect(&self, module: &str, desired_running: bool) -> (Evidence, Resolution) {
        let evidence = self.gather(module);
        let resolution = resolve(&evidence, desired_running);
        (evidence, resolution)
    }

    /// 결정을 확정: 필요하면 pid 파일을 지우고 진단 로그를 남김
    pub fn settle(&self, module: &str, evidence: &Evidence, resolution: &Resolution) -> ModuleStatus {
        let pid_file = self.pid_file(module);
        let removed = if resolution.delete_pid_file {
            match pid_file.remove() {
                Ok(removed) => removed,
                Err(e) => {
                    tracing::error!(
                        "[Reconcile] Could not remove pid file {}: {}",
                        pid_file.path().display(),
                        e
                    );
                    false
                }
            }
        } else {
            false
        };

        log_resolution(module, evidence, resolution, removed);
        resolution.status
    }

    /// 동기 버전: 프로세스 테이블 전체를 스캔하므로 async 문맥에서는
    /// [`StatusChecker::check_status_async`] 를 사용하세요.
    pub fn check_status(&self, module: &str, desired_running: bool) -> ModuleStatus {
        let (evidence, resolution) = self.inspect(module, desired_running);
        self.settle(module, &evidence, &resolution)
    }

    pub async fn inspect_async(
        self: &Arc<Self>,
        module: &str,
        desired_running: bool,
    ) -> (Evidence, Resolution) {
        let checker = self.clone();
        let name = module.to_string();
        match tokio::task::spawn_blocking(move || checker.inspect(&name, desired_running)).await {
            Ok(inspected) => inspected,
            Err(e) => {
                tracing::error!("[Reconcile] Status check for '{}' aborted: {}", module, e);
                let evidence = Evidence::Indeterminate {
                    pid: 0,
                    reason: e.to_string(),
                };
                let resolution = resolve(&evidence, desired_running);
                (evidence, resolution)
            }
        }
    }

    pub async fn check_status_async(
        self: &Arc<Self>,
        module: &str,
        desired_running: bool,
    ) -> ModuleStatus {
        let (evidence, resolution) = self.inspect_async(module, desired_running).await;
        self.settle(module, &evidence, &resolution)
    }
}

fn log_resolution(module: &str, evidence: &Evidence, resolution: &Resolution, removed: bool) {
    match resolution.diagnosis {
        Diagnosis::Healthy => {
            tracing::debug!("[Reconcile] '{}' is running and pid file exists", module)
        }
        Diagnosis::CleanlyStopped => {
            tracing::debug!("[Reconcile] '{}' is stopped and no pid file exists", module)
        }
        Diagnosis::Vanished => tracing::error!(
            "[Reconcile] '{}' should be running but has no pid file, marking crashed",
            module
        ),
        Diagnosis::CrashedStale => tracing::error!(
            "[Reconcile] '{}' should be running but its process is gone ({:?}), marking crashed. Pid file removed: {}",
            module,
            evidence,
            removed
        ),
        Diagnosis::LeftoverPidFile => tracing::info!(
            "[Reconcile] '{}' is stopped but pid file was left behind. Removed: {}",
            module,
            removed
        ),
        Diagnosis::AliveDespiteStop => tracing::warn!(
            "[Reconcile] '{}' should be stopped but is still running ({:?})",
            module,
            evidence
        ),
        Diagnosis::PidFileUnreadable | Diagnosis::ProbeFailed => tracing::error!(
            "[Reconcile] Could not determine state of '{}' ({:?}), try again later",
            module,
            evidence
        ),
    }
}
