//! 통합 테스트 공용 가짜 협력자와 하네스
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;

use stap_core::config::StapConfig;
use stap_core::notify::{Notice, NotificationSink};
use stap_core::process_monitor::{ProbeError, ProcessTable};
use stap_core::registry::InMemoryRegistry;
use stap_core::supervisor::privileged::{CommandOutcome, CommandRunner};
use stap_core::supervisor::scheduler::{PeriodicJob, ScheduledTask, Scheduler};
use stap_core::supervisor::wake_lock::ExclusiveResource;
use stap_core::supervisor::{Collaborators, Supervisor};

pub const PROCESS_NAME: &str = "stapio";

/// 이름 → pid 목록
#[derive(Default)]
pub struct FakeProcessTable {
    pids: Mutex<HashMap<String, Vec<u32>>>,
    pub broken: AtomicBool,
}

impl FakeProcessTable {
    pub fn add(&self, name: &str, pid: u32) {
        self.pids
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(pid);
    }

    pub fn remove(&self, name: &str, pid: u32) {
        if let Some(pids) = self.pids.lock().unwrap().get_mut(name) {
            pids.retain(|p| *p != pid);
        }
    }
}

impl ProcessTable for FakeProcessTable {
    fn pids_of(&self, name: &str) -> Result<Vec<u32>, ProbeError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ProbeError::QueryFailed("process table unavailable".into()));
        }
        Ok(self.pids.lock().unwrap().get(name).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub command: String,
    pub input: Vec<String>,
}

/// 시작 스크립트는 pid 파일을 쓰고 stapio 를 "띄우며",
/// 정지 스크립트는 해당 pid 를 프로세스 테이블에서 지웁니다.
pub struct FakeRunner {
    pub calls: Mutex<Vec<Call>>,
    pub exit_code: AtomicI32,
    pub spawns_process: AtomicBool,
    pub kills_process: AtomicBool,
    pub delay: Mutex<Duration>,
    /// pid 파일을 쓴 뒤 프로세스가 테이블에 나타나기까지의 지연
    pub process_delay: Mutex<Duration>,
    next_pid: AtomicU32,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    table: Arc<FakeProcessTable>,
    run_dir: PathBuf,
}

impl FakeRunner {
    pub fn new(table: Arc<FakeProcessTable>, run_dir: &Path) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            exit_code: AtomicI32::new(0),
            spawns_process: AtomicBool::new(true),
            kills_process: AtomicBool::new(true),
            delay: Mutex::new(Duration::ZERO),
            process_delay: Mutex::new(Duration::ZERO),
            next_pid: AtomicU32::new(4000),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            table,
            run_dir: run_dir.to_path_buf(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    fn value_of<'a>(input: &'a [String], key: &str) -> Option<&'a str> {
        input
            .iter()
            .find_map(|line| line.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
    }

    fn simulate(&self, command: &str, input: &[String]) {
        if command.ends_with("start_stap.sh") && self.spawns_process.load(Ordering::SeqCst) {
            if let Some(module) = Self::value_of(input, "modulename") {
                let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
                std::fs::write(self.run_dir.join(format!("{}.pid", module)), format!("{}\n", pid))
                    .unwrap();
                let process_delay = *self.process_delay.lock().unwrap();
                if process_delay.is_zero() {
                    self.table.add(PROCESS_NAME, pid);
                } else {
                    let table = self.table.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(process_delay).await;
                        table.add(PROCESS_NAME, pid);
                    });
                }
            }
        } else if command.ends_with("kill_stap.sh") && self.kills_process.load(Ordering::SeqCst) {
            if let Some(pid) = Self::value_of(input, "pid").and_then(|p| p.parse().ok()) {
                self.table.remove(PROCESS_NAME, pid);
            }
        }
    }
}

impl CommandRunner for FakeRunner {
    fn run<'a>(&'a self, command: &'a str, input: &'a [String]) -> BoxFuture<'a, CommandOutcome> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            self.calls.lock().unwrap().push(Call {
                command: command.to_string(),
                input: input.to_vec(),
            });
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let exit_code = self.exit_code.load(Ordering::SeqCst);
            if exit_code == 0 {
                self.simulate(command, input);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            CommandOutcome {
                exit_code,
                stderr: if exit_code == 0 { Vec::new() } else { vec!["boom".to_string()] },
            }
        })
    }
}

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

/// `fire()` 로 tick 을 직접 구동
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
            .filter(|(c, _)| !c.load(Ordering::SeqCst))
            .count()
    }

    pub async fn fire(&self) {
        let live: Vec<PeriodicJob> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| !c.load(Ordering::SeqCst))
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
pub struct FakeWakeLock {
    held: AtomicBool,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl ExclusiveResource for FakeWakeLock {
    fn acquire(&self) -> std::io::Result<()> {
        if !self.held.swap(true, Ordering::SeqCst) {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn release(&self) -> std::io::Result<()> {
        if self.held.swap(false, Ordering::SeqCst) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: StapConfig,
    pub table: Arc<FakeProcessTable>,
    pub runner: Arc<FakeRunner>,
    pub scheduler: Arc<ManualScheduler>,
    pub wake_lock: Arc<FakeWakeLock>,
    pub notifier: Arc<RecordingNotifier>,
    pub supervisor: Arc<Supervisor>,
}

pub fn test_config(root: &Path) -> StapConfig {
    let mut config = StapConfig::default();
    config.paths.modules_dir = root.join("modules");
    config.paths.output_dir = root.join("output");
    config.paths.log_dir = root.join("logs");
    config.paths.run_dir = root.join("run");
    config.paths.support_dir = root.join("support");
    config.timing.start_grace_ms = 0;
    config.timing.stop_grace_ms = 0;
    config.timing.readiness_backoff_ms = 5;
    config.timing.readiness_backoff_max_ms = 10;
    config.timing.readiness_deadline_ms = 50;
    config.wake_lock.enabled = true;
    config
}

impl Harness {
    /// tokio 런타임 안에서 호출
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut StapConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        adjust(&mut config);
        std::fs::create_dir_all(&config.paths.modules_dir).unwrap();
        std::fs::create_dir_all(&config.paths.run_dir).unwrap();

        let table = Arc::new(FakeProcessTable::default());
        let runner = Arc::new(FakeRunner::new(table.clone(), &config.paths.run_dir));
        let scheduler = Arc::new(ManualScheduler::default());
        let wake_lock = Arc::new(FakeWakeLock::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let supervisor = Arc::new(Supervisor::new(
            config.clone(),
            Collaborators {
                runner: runner.clone(),
                process_table: table.clone(),
                scheduler: scheduler.clone(),
                wake_lock: wake_lock.clone(),
                registry: Arc::new(InMemoryRegistry::new()),
                notifier: notifier.clone(),
            },
        ));

        Self {
            dir,
            config,
            table,
            runner,
            scheduler,
            wake_lock,
            notifier,
            supervisor,
        }
    }

    pub fn add_module_file(&self, name: &str) {
        std::fs::write(self.config.module_path(name), b"\x7fELF").unwrap();
    }

    pub fn pid_path(&self, name: &str) -> PathBuf {
        self.config.paths.run_dir.join(format!("{}.pid", name))
    }

    pub fn read_pid(&self, name: &str) -> u32 {
        std::fs::read_to_string(self.pid_path(name))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }
}
