//! 모듈 시작/정지, 실행 카운터, 주기 재검증 통합 테스트

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Harness, PROCESS_NAME};
use stap_core::notify::Notice;
use stap_core::registry::ModuleStatus;
use stap_core::supervisor::{ModuleRequest, SupervisorError};

#[tokio::test]
async fn test_start_iotrace_becomes_running() {
    let h = Harness::new();
    h.add_module_file("iotrace");

    let status = h.supervisor.start_module("iotrace").await.unwrap();
    assert_eq!(status, ModuleStatus::Running);
    assert_eq!(h.supervisor.module("iotrace").unwrap().status, ModuleStatus::Running);

    let snapshot = h.supervisor.running_snapshot();
    assert_eq!(snapshot.count, 1);
    assert!(snapshot.timer_active);
    assert!(snapshot.wake_lock_held);
    assert_eq!(h.scheduler.scheduled_count(), 1);

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].command.ends_with("start_stap.sh"));

    let paths = &h.config.paths;
    let input = &calls[0].input;
    assert_eq!(input.len(), 8);
    assert_eq!(input[0], "modulename=iotrace");
    assert_eq!(input[1], format!("moduledir={}", paths.modules_dir.display()));
    // outputname=iotrace_YYYY.MM.DD_HH.mm.ss
    let stamp = input[2].strip_prefix("outputname=iotrace_").unwrap();
    assert_eq!(stamp.len(), "2024.01.01_00.00.00".len());
    assert_eq!(input[3], format!("outputdir={}", paths.output_dir.display()));
    assert_eq!(input[4], format!("logdir={}", paths.log_dir.display()));
    assert_eq!(input[5], format!("rundir={}", paths.run_dir.display()));
    assert_eq!(input[6], format!("stapdir={}", paths.support_dir.display()));
    assert_eq!(input[7], ":q!");

    assert!(h.notifier.notices().is_empty());
}

#[tokio::test]
async fn test_stop_last_module_releases_everything() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    h.supervisor.start_module("iotrace").await.unwrap();
    let pid = h.read_pid("iotrace");

    let status = h.supervisor.stop_module("iotrace").await.unwrap();
    assert_eq!(status, ModuleStatus::Stopped);
    assert_eq!(h.supervisor.module("iotrace").unwrap().status, ModuleStatus::Stopped);

    let snapshot = h.supervisor.running_snapshot();
    assert_eq!(snapshot.count, 0);
    assert!(!snapshot.timer_active);
    assert!(!snapshot.wake_lock_held);
    assert_eq!(h.scheduler.live_count(), 0);
    assert_eq!(h.wake_lock.released.load(Ordering::SeqCst), 1);
    // 남은 pid 파일은 정리됨
    assert!(!h.pid_path("iotrace").exists());

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].command.ends_with("kill_stap.sh"));
    assert_eq!(
        calls[1].input,
        vec![
            format!("pid={}", pid),
            format!("busyboxdir={}", h.config.paths.support_dir.display()),
            ":q!".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_start_missing_module_never_invokes_runner() {
    let h = Harness::new();

    let err = h.supervisor.start_module("ghost").await.unwrap_err();
    assert!(matches!(err, SupervisorError::ModuleNotFound(ref m) if m == "ghost"));
    assert!(h.runner.calls().is_empty());
    assert!(h.supervisor.module("ghost").is_none());
    assert_eq!(h.notifier.notices(), vec![Notice::ModuleMissing { module: "ghost".into() }]);
}

#[tokio::test]
async fn test_stop_without_pid_file_reports_not_running() {
    let h = Harness::new();

    let err = h.supervisor.stop_module("iotrace").await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotRunning(_)));
    assert!(h.runner.calls().is_empty());
    assert_eq!(h.notifier.notices(), vec![Notice::NotRunning { module: "iotrace".into() }]);
}

#[tokio::test]
async fn test_stop_with_malformed_pid_file_aborts() {
    let h = Harness::new();
    std::fs::write(h.pid_path("iotrace"), "not-a-pid\n").unwrap();

    let err = h.supervisor.stop_module("iotrace").await.unwrap_err();
    assert!(matches!(err, SupervisorError::PidFile { .. }));
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_name_is_rejected_before_anything() {
    let h = Harness::new();
    let err = h.supervisor.start_module("../../bin/sh").await.unwrap_err();
    assert!(matches!(err, SupervisorError::InvalidModuleName(_)));
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_start_script_failure_marks_crashed() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    h.runner.set_exit_code(1);

    let err = h.supervisor.start_module("iotrace").await.unwrap_err();
    assert!(matches!(err, SupervisorError::CommandFailed { exit_code: 1, .. }));
    assert_eq!(h.supervisor.module("iotrace").unwrap().status, ModuleStatus::Crashed);
    assert_eq!(h.supervisor.running_snapshot().count, 0);
    assert_eq!(h.scheduler.scheduled_count(), 0);
    assert_eq!(h.notifier.notices(), vec![Notice::StartFailed { module: "iotrace".into() }]);
}

#[tokio::test]
async fn test_start_without_pid_file_settles_crashed() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    h.runner.spawns_process.store(false, Ordering::SeqCst);

    let status = h.supervisor.start_module("iotrace").await.unwrap();
    assert_eq!(status, ModuleStatus::Crashed);
    assert_eq!(h.supervisor.running_snapshot().count, 0);
    assert_eq!(h.scheduler.scheduled_count(), 0);
    assert_eq!(h.notifier.notices(), vec![Notice::Crashed { module: "iotrace".into() }]);
}

#[tokio::test]
async fn test_start_waits_for_late_process() {
    let h = Harness::with_config(|c| c.timing.readiness_deadline_ms = 2_000);
    h.add_module_file("iotrace");
    // pid 파일은 바로 생기지만 stapio 는 첫 확인 이후에 나타남
    *h.runner.process_delay.lock().unwrap() = Duration::from_millis(40);

    let status = h.supervisor.start_module("iotrace").await.unwrap();
    assert_eq!(status, ModuleStatus::Running);
    assert!(h.pid_path("iotrace").exists());
    assert_eq!(h.read_pid("iotrace"), 4000);
    assert_eq!(h.supervisor.running_snapshot().count, 1);
    assert!(h.notifier.notices().is_empty());

    // pid 파일이 남아 있으므로 정지도 정상 동작
    let status = h.supervisor.stop_module("iotrace").await.unwrap();
    assert_eq!(status, ModuleStatus::Stopped);
}

#[tokio::test]
async fn test_start_deadline_purges_stale_pid_file_once() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    *h.runner.process_delay.lock().unwrap() = Duration::from_secs(60);

    let status = h.supervisor.start_module("iotrace").await.unwrap();
    assert_eq!(status, ModuleStatus::Crashed);
    assert!(!h.pid_path("iotrace").exists());
    assert_eq!(h.supervisor.running_snapshot().count, 0);
    assert_eq!(h.notifier.notices(), vec![Notice::Crashed { module: "iotrace".into() }]);
}

#[tokio::test]
async fn test_stop_with_failing_process_query_settles_stopped() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    h.supervisor.start_module("iotrace").await.unwrap();
    h.table.broken.store(true, Ordering::SeqCst);

    let status = h.supervisor.stop_module("iotrace").await.unwrap();
    assert_eq!(status, ModuleStatus::Stopped);
    assert_eq!(h.supervisor.module("iotrace").unwrap().status, ModuleStatus::Stopped);
    assert_eq!(h.supervisor.running_snapshot().count, 0);
    // 판단 불가이므로 pid 파일은 남김
    assert!(h.pid_path("iotrace").exists());
}

#[tokio::test]
async fn test_stop_script_failure_keeps_status() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    h.supervisor.start_module("iotrace").await.unwrap();
    h.runner.set_exit_code(2);

    let err = h.supervisor.stop_module("iotrace").await.unwrap_err();
    assert!(matches!(err, SupervisorError::CommandFailed { exit_code: 2, .. }));
    assert_eq!(h.supervisor.module("iotrace").unwrap().status, ModuleStatus::Running);
    assert_eq!(h.supervisor.running_snapshot().count, 1);
    assert!(h.pid_path("iotrace").exists());
    assert_eq!(h.notifier.notices(), vec![Notice::StopFailed { module: "iotrace".into() }]);
}

#[tokio::test]
async fn test_process_surviving_stop_stays_running() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    h.supervisor.start_module("iotrace").await.unwrap();
    h.runner.kills_process.store(false, Ordering::SeqCst);

    let status = h.supervisor.stop_module("iotrace").await.unwrap();
    assert_eq!(status, ModuleStatus::Running);
    assert_eq!(h.supervisor.running_snapshot().count, 1);
    assert!(h.pid_path("iotrace").exists());
    assert_eq!(h.notifier.notices(), vec![Notice::StillRunning { module: "iotrace".into() }]);
}

#[tokio::test]
async fn test_repeated_start_does_not_double_count() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    h.supervisor.start_module("iotrace").await.unwrap();
    h.supervisor.start_module("iotrace").await.unwrap();

    assert_eq!(h.supervisor.running_snapshot().count, 1);
    assert_eq!(h.scheduler.scheduled_count(), 1);
}

#[tokio::test]
async fn test_counter_tracks_multiple_modules() {
    let h = Harness::new();
    for name in ["iotrace", "netwatch", "sched_lat"] {
        h.add_module_file(name);
        h.supervisor.start_module(name).await.unwrap();
    }
    assert_eq!(h.supervisor.running_snapshot().count, 3);
    assert_eq!(h.scheduler.scheduled_count(), 1);
    assert_eq!(h.wake_lock.acquired.load(Ordering::SeqCst), 1);

    for name in ["netwatch", "iotrace"] {
        h.supervisor.stop_module(name).await.unwrap();
    }
    let snapshot = h.supervisor.running_snapshot();
    assert_eq!(snapshot.count, 1);
    assert!(snapshot.timer_active);
    assert!(snapshot.wake_lock_held);

    h.supervisor.stop_module("sched_lat").await.unwrap();
    let snapshot = h.supervisor.running_snapshot();
    assert_eq!(snapshot.count, 0);
    assert!(!snapshot.timer_active);
    assert!(!snapshot.wake_lock_held);
}

#[tokio::test]
async fn test_revalidation_detects_external_crash() {
    let h = Harness::new();
    for name in ["iotrace", "netwatch"] {
        h.add_module_file(name);
        h.supervisor.start_module(name).await.unwrap();
    }

    // netwatch 의 stapio 가 외부에서 죽음
    let netwatch_pid = h.read_pid("netwatch");
    h.table.remove(PROCESS_NAME, netwatch_pid);
    h.scheduler.fire().await;

    assert_eq!(h.supervisor.module("netwatch").unwrap().status, ModuleStatus::Crashed);
    assert_eq!(h.supervisor.module("iotrace").unwrap().status, ModuleStatus::Running);
    assert!(!h.pid_path("netwatch").exists());
    assert_eq!(h.supervisor.running_snapshot().count, 1);
    assert_eq!(h.scheduler.live_count(), 1);
    assert_eq!(h.notifier.notices(), vec![Notice::Crashed { module: "netwatch".into() }]);

    // 마지막 모듈도 죽으면 tick 안에서 타이머가 스스로 취소됨
    let iotrace_pid = h.read_pid("iotrace");
    h.table.remove(PROCESS_NAME, iotrace_pid);
    h.scheduler.fire().await;

    let snapshot = h.supervisor.running_snapshot();
    assert_eq!(snapshot.count, 0);
    assert!(!snapshot.timer_active);
    assert!(!snapshot.wake_lock_held);
    assert_eq!(h.scheduler.live_count(), 0);
}

#[tokio::test]
async fn test_initialize_adopts_live_modules_and_purges_stale() {
    let h = Harness::new();
    std::fs::write(h.pid_path("iotrace"), "501\n").unwrap();
    std::fs::write(h.pid_path("netwatch"), "4242\n").unwrap();
    h.table.add(PROCESS_NAME, 501);

    h.supervisor.initialize().await.unwrap();

    assert_eq!(h.supervisor.module("iotrace").unwrap().status, ModuleStatus::Running);
    assert_eq!(h.supervisor.module("netwatch").unwrap().status, ModuleStatus::Crashed);
    assert!(!h.pid_path("netwatch").exists());
    assert_eq!(h.supervisor.running_snapshot().count, 1);
    assert!(h.config.paths.output_dir.is_dir());
    assert!(h.config.paths.log_dir.is_dir());
}

#[tokio::test]
async fn test_check_status_uses_recorded_state() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    h.supervisor.start_module("iotrace").await.unwrap();
    assert_eq!(
        h.supervisor.check_status("iotrace").await.unwrap(),
        ModuleStatus::Running
    );

    let pid = h.read_pid("iotrace");
    h.table.remove(PROCESS_NAME, pid);
    assert_eq!(
        h.supervisor.check_status("iotrace").await.unwrap(),
        ModuleStatus::Crashed
    );
    assert_eq!(h.supervisor.running_snapshot().count, 0);

    // 알려지지 않은 모듈은 정지 상태로 기대하고, 레지스트리에 추가하지 않음
    assert_eq!(
        h.supervisor.check_status("unknown").await.unwrap(),
        ModuleStatus::Stopped
    );
    assert!(h.supervisor.module("unknown").is_none());
    let names: Vec<_> = h.supervisor.modules().into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["iotrace"]);
}

#[tokio::test]
async fn test_check_status_does_not_register_modules() {
    let h = Harness::new();
    assert_eq!(
        h.supervisor.check_status("ghost").await.unwrap(),
        ModuleStatus::Stopped
    );
    assert!(h.supervisor.modules().is_empty());
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_requests_are_processed_one_at_a_time() {
    let h = Harness::new();
    *h.runner.delay.lock().unwrap() = Duration::from_millis(20);
    let names = ["a1", "a2", "a3", "a4"];
    for name in names {
        h.add_module_file(name);
    }

    let handles: Vec<_> = names
        .iter()
        .map(|name| {
            let supervisor = h.supervisor.clone();
            let name = name.to_string();
            tokio::spawn(async move { supervisor.start_module(&name).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), ModuleStatus::Running);
    }

    assert_eq!(h.runner.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(h.supervisor.running_snapshot().count, 4);
}

#[tokio::test]
async fn test_fire_and_forget_request() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    h.supervisor
        .request(ModuleRequest::Start { module: "iotrace".into() })
        .await
        .unwrap();

    let mut processed = 0;
    for _ in 0..100 {
        processed = h.supervisor.worker_status().await.processed;
        if processed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(processed, 1);
    assert_eq!(h.supervisor.module("iotrace").unwrap().status, ModuleStatus::Running);
}

#[tokio::test]
async fn test_shutdown_closes_queue_and_releases_resources() {
    let h = Harness::new();
    h.add_module_file("iotrace");
    h.supervisor.start_module("iotrace").await.unwrap();

    h.supervisor.shutdown().await;
    let snapshot = h.supervisor.running_snapshot();
    assert!(!snapshot.timer_active);
    assert!(!snapshot.wake_lock_held);

    let err = h.supervisor.start_module("iotrace").await.unwrap_err();
    assert!(matches!(err, SupervisorError::QueueClosed));
}
