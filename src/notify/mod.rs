//! 사용자 알림: 호스트 UI 의 토스트에 해당하는 메시지를 내보냅니다.

use tokio::sync::broadcast;

/// 사용자에게 표시할 알림
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// 모듈 파일이 없어 시작할 수 없음
    ModuleMissing { module: String },
    /// 시작 스크립트 실패
    StartFailed { module: String },
    /// 정지 스크립트 실패
    StopFailed { module: String },
    /// pid 파일이 없어 정지할 수 없음
    NotRunning { module: String },
    /// 실행 중이어야 할 모듈이 죽어 있음
    Crashed { module: String },
    /// 정지 요청 후에도 프로세스가 살아 있음
    StillRunning { module: String },
}

impl Notice {
    pub fn module(&self) -> &str {
        match self {
            Self::ModuleMissing { module }
            | Self::StartFailed { module }
            | Self::StopFailed { module }
            | Self::NotRunning { module }
            | Self::Crashed { module }
            | Self::StillRunning { module } => module,
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModuleMissing { module } => write!(f, "No such module: {}", module),
            Self::StartFailed { module } => write!(f, "Could not start module: {}", module),
            Self::StopFailed { module } => write!(f, "Could not stop module: {}", module),
            Self::NotRunning { module } => write!(f, "Module is not running: {}", module),
            Self::Crashed { module } => write!(f, "Module crashed: {}", module),
            Self::StillRunning { module } => write!(f, "Module is still running: {}", module),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// 로그로만 남기는 싱크
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notice: Notice) {
        tracing::warn!("[Notice] {}", notice);
    }
}

/// 구독자에게 알림을 브로드캐스트 (GUI/CLI 용). 로그는 항상 남깁니다.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notice>,
    log: TracingNotifier,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            log: TracingNotifier,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl NotificationSink for BroadcastNotifier {
    fn notify(&self, notice: Notice) {
        self.log.notify(notice.clone());
        // 구독자가 없으면 send 가 실패하지만 무시해도 됨
        let _ = self.tx.send(notice);
    }
}
