use std::sync::Arc;

use crate::process_monitor::{ProbeError, ProcessTable};

/// pid 가 기대한 종류의 살아 있는 프로세스인지 확인
#[derive(Clone)]
pub struct LivenessProbe {
    table: Arc<dyn ProcessTable>,
    expected_name: String,
}

impl LivenessProbe {
    pub fn new(table: Arc<dyn ProcessTable>, expected_name: &str) -> Self {
        Self {
            table,
            expected_name: expected_name.to_string(),
        }
    }

    /// 설정된 프로세스 이름으로 확인
    pub fn is_alive(&self, pid: u32) -> Result<bool, ProbeError> {
        self.is_pid_alive(pid, &self.expected_name)
    }

    /// Err 는 "조회 자체가 실패": 호출자는 이를 "죽었음" 으로 취급하면 안 됩니다.
    pub fn is_pid_alive(&self, pid: u32, expected_name: &str) -> Result<bool, ProbeError> {
        let pids = self.table.pids_of(expected_name)?;
        Ok(pids.contains(&pid))
    }
}
