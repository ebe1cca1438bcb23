use thiserror::Error;

use crate::registry::ModuleStatus;

/// 시작/정지 요청 하나가 거치는 단계
///
/// `Requested → ScriptInvoked → GraceWait → Probed → Settled(status)`.
/// `Probed` 는 backoff 재확인이 끝날 때까지 유지됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Requested,
    /// 스크립트를 호출하기 전에 거절됨 (모듈 파일 없음, pid 파일 없음 등)
    Rejected,
    ScriptInvoked,
    /// 스크립트가 0 이 아닌 코드로 종료
    ScriptFailed,
    /// 스크립트 성공 후 프로세스가 pid 파일을 쓸 때까지 대기
    GraceWait,
    /// pid 파일/프로세스 확인 중
    Probed,
    Settled(ModuleStatus),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Rejected | Phase::ScriptFailed | Phase::Settled(_))
    }
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(Phase, Phase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Start,
    Stop,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Start => write!(f, "start"),
            RequestKind::Stop => write!(f, "stop"),
        }
    }
}

pub struct StateMachine {
    pub kind: RequestKind,
    pub module: String,
    pub phase: Phase,
}

impl StateMachine {
    pub fn new(kind: RequestKind, module: &str) -> Self {
        Self {
            kind,
            module: module.to_string(),
            phase: Phase::Requested,
        }
    }

    pub fn can_transition(&self, to: &Phase) -> bool {
        matches!(
            (&self.phase, to),
            (Phase::Requested, Phase::Rejected)
                | (Phase::Requested, Phase::ScriptInvoked)
                | (Phase::ScriptInvoked, Phase::ScriptFailed)
                | (Phase::ScriptInvoked, Phase::GraceWait)
                | (Phase::GraceWait, Phase::Probed)
                | (Phase::Probed, Phase::Settled(_))
        )
    }

    pub fn transition(&mut self, to: Phase) -> Result<(), TransitionError> {
        if self.can_transition(&to) {
            tracing::debug!(
                "[Lifecycle] {} '{}': {:?} -> {:?}",
                self.kind,
                self.module,
                self.phase,
                to
            );
            self.phase = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.phase, to))
        }
    }

    /// 잘못된 전이는 로그만 남기고 무시 (요청 처리 자체는 계속)
    pub fn advance(&mut self, to: Phase) {
        if let Err(e) = self.transition(to) {
            tracing::warn!("[Lifecycle] {} '{}': {}", self.kind, self.module, e);
            return;
        }
        if self.phase.is_terminal() {
            tracing::info!(
                "[Lifecycle] {} request for '{}' finished: {:?}",
                self.kind,
                self.module,
                self.phase
            );
        }
    }
}
