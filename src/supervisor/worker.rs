//! 요청 워커: 시작/정지 요청을 단일 큐에서 순서대로 처리합니다.
//!
//! 스크립트 호출, grace 대기, 확인이 모두 같은 pid 파일 공간을 건드리므로
//! 서로 다른 모듈의 요청이라도 동시에 진행하지 않습니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::registry::ModuleStatus;

use super::controller::LifecycleController;
use super::error::SupervisorError;

const QUEUE_CAPACITY: usize = 32;

/// 모듈 요청
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ModuleRequest {
    Start { module: String },
    Stop { module: String },
}

impl ModuleRequest {
    pub fn module(&self) -> &str {
        match self {
            Self::Start { module } | Self::Stop { module } => module,
        }
    }
}

impl std::fmt::Display for ModuleRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start { module } => write!(f, "start {}", module),
            Self::Stop { module } => write!(f, "stop {}", module),
        }
    }
}

type Reply = oneshot::Sender<Result<ModuleStatus, SupervisorError>>;

enum WorkerTask {
    Request {
        request: ModuleRequest,
        reply: Option<Reply>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStatus {
    pub busy: bool,
    pub current_task: Option<String>,
    pub processed: u64,
}

pub struct RequestWorker {
    task_tx: mpsc::Sender<WorkerTask>,
    status: Arc<RwLock<WorkerStatus>>,
}

impl RequestWorker {
    /// 워커 생성 및 시작 (tokio 런타임 안에서 호출)
    pub fn spawn(controller: Arc<LifecycleController>) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<WorkerTask>(QUEUE_CAPACITY);
        let status = Arc::new(RwLock::new(WorkerStatus::default()));

        let status_clone = status.clone();
        tokio::spawn(async move {
            worker_loop(controller, task_rx, status_clone).await;
        });

        Self { task_tx, status }
    }

    /// 큐에 넣고 바로 반환
    pub async fn submit(&self, request: ModuleRequest) -> Result<(), SupervisorError> {
        self.task_tx
            .send(WorkerTask::Request {
                request,
                reply: None,
            })
            .await
            .map_err(|_| SupervisorError::QueueClosed)
    }

    /// 큐에 넣고 처리 결과까지 대기
    pub async fn submit_and_wait(
        &self,
        request: ModuleRequest,
    ) -> Result<ModuleStatus, SupervisorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.task_tx
            .send(WorkerTask::Request {
                request,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| SupervisorError::QueueClosed)?;
        reply_rx.await.map_err(|_| SupervisorError::QueueClosed)?
    }

    pub async fn get_status(&self) -> WorkerStatus {
        self.status.read().await.clone()
    }

    /// 이미 들어온 요청을 처리한 뒤 종료
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        self.task_tx
            .send(WorkerTask::Shutdown)
            .await
            .map_err(|_| SupervisorError::QueueClosed)
    }
}

async fn worker_loop(
    controller: Arc<LifecycleController>,
    mut task_rx: mpsc::Receiver<WorkerTask>,
    status: Arc<RwLock<WorkerStatus>>,
) {
    tracing::info!("[Worker] Request worker started");

    while let Some(task) = task_rx.recv().await {
        match task {
            WorkerTask::Shutdown => {
                tracing::info!("[Worker] Shutdown requested");
                break;
            }
            WorkerTask::Request { request, reply } => {
                {
                    let mut s = status.write().await;
                    s.busy = true;
                    s.current_task = Some(request.to_string());
                }

                let result = handle_request(&controller, &request).await;
                if let Err(e) = &result {
                    tracing::warn!("[Worker] Request '{}' failed: {}", request, e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }

                let mut s = status.write().await;
                s.busy = false;
                s.current_task = None;
                s.processed += 1;
            }
        }
    }

    tracing::info!("[Worker] Request worker stopped");
}

async fn handle_request(
    controller: &LifecycleController,
    request: &ModuleRequest,
) -> Result<ModuleStatus, SupervisorError> {
    tracing::info!("[Worker] Processing '{}'", request);
    match request {
        ModuleRequest::Start { module } => controller.start(module).await,
        ModuleRequest::Stop { module } => controller.stop(module).await,
    }
}
