use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use sysinfo::System;
use thiserror::Error;

/// 프로세스 테이블 조회 실패: "죽었음" 과 구분되는 "알 수 없음"
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("process query failed: {0}")]
    QueryFailed(String),

    #[error("unparsable process query output: {0}")]
    BadOutput(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningProcess {
    pub pid: u32,
    pub name: String,
}

/// 이름으로 실행 중인 pid 집합을 조회하는 백엔드
pub trait ProcessTable: Send + Sync {
    fn pids_of(&self, process_name: &str) -> Result<Vec<u32>, ProbeError>;
}

/// sysinfo 기반 (크로스 플랫폼)
#[derive(Debug, Default)]
pub struct SysinfoProcessTable;

impl ProcessTable for SysinfoProcessTable {
    fn pids_of(&self, process_name: &str) -> Result<Vec<u32>, ProbeError> {
        let pids: Vec<u32> = get_running_processes()
            .into_iter()
            .filter(|p| p.name == process_name)
            .map(|p| p.pid)
            .collect();
        tracing::debug!("[Probe] {} process(es) named '{}'", pids.len(), process_name);
        Ok(pids)
    }
}

/// `busybox pidof <name>` 기반: 기기에 sysinfo 가 읽을 수 있는 /proc 권한이 없을 때
#[derive(Debug, Clone)]
pub struct PidofProcessTable {
    busybox: PathBuf,
}

impl PidofProcessTable {
    pub fn new(busybox: PathBuf) -> Self {
        Self { busybox }
    }
}

impl ProcessTable for PidofProcessTable {
    fn pids_of(&self, process_name: &str) -> Result<Vec<u32>, ProbeError> {
        let output = std::process::Command::new(&self.busybox)
            .arg("pidof")
            .arg(process_name)
            .output()
            .map_err(|e| {
                ProbeError::QueryFailed(format!("failed to run {}: {}", self.busybox.display(), e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match output.status.code() {
            Some(0) => parse_pid_list(&stdout),
            // pidof 는 일치하는 프로세스가 없으면 1 로 종료
            Some(1) if stdout.trim().is_empty() => Ok(Vec::new()),
            code => Err(ProbeError::QueryFailed(format!(
                "pidof exited with {:?}: {}",
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// 공백으로 구분된 pid 목록 파싱 (여러 줄 허용)
pub fn parse_pid_list(output: &str) -> Result<Vec<u32>, ProbeError> {
    output
        .split_whitespace()
        .map(|tok| {
            tok.parse::<u32>()
                .map_err(|_| ProbeError::BadOutput(tok.to_string()))
        })
        .collect()
}

/// 실행 중인 모든 프로세스 목록
pub fn get_running_processes() -> Vec<RunningProcess> {
    let mut sys = System::new();
    sys.refresh_processes();

    let processes: Vec<RunningProcess> = sys
        .processes()
        .iter()
        .map(|(pid, process)| RunningProcess {
            pid: pid.as_u32(),
            name: process.name().to_string(),
        })
        .collect();

    tracing::trace!("Found {} running processes", processes.len());
    processes
}
