//! 권한 상승 명령 실행: 스크립트를 root 로 실행하고 `key=value` 줄을 stdin 으로 전달합니다.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::config::{EscalationMode, StapConfig};

/// 프로세스를 띄우거나 기다릴 수 없을 때의 종료 코드 (실제 종료 코드와 겹치지 않음)
pub const SPAWN_FAILED: i32 = -1;

/// 스크립트 입력의 마지막 줄
pub const INPUT_TERMINATOR: &str = ":q!";

/// 실패 시 보관하는 stderr 최대 줄 수
const MAX_STDERR_LINES: usize = 256;

/// 실패 경로에서 stderr EOF 를 기다리는 최대 시간
/// (백그라운드로 남은 자식이 파이프를 물고 있을 수 있음)
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub exit_code: i32,
    /// 종료 코드가 0 이 아닐 때만 채워짐
    pub stderr: Vec<String>,
}

impl CommandOutcome {
    pub fn spawn_failed() -> Self {
        Self {
            exit_code: SPAWN_FAILED,
            stderr: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 권한 상승 방식
pub trait CommandEscalator: Send + Sync {
    fn command(&self, script: &str) -> Command;
}

/// `su -c <script>`
pub struct SuEscalator {
    su_path: String,
}

impl SuEscalator {
    pub fn new(su_path: &str) -> Self {
        Self {
            su_path: su_path.to_string(),
        }
    }
}

impl CommandEscalator for SuEscalator {
    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.su_path);
        cmd.arg("-c").arg(script);
        cmd
    }
}

/// `sh -c <script>`: 이미 root 이거나 개발 환경일 때
pub struct ShellEscalator;

impl CommandEscalator for ShellEscalator {
    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }
}

/// 설정에 맞는 escalator 선택. 이미 root 면 su 를 거치지 않습니다.
pub fn escalator_for(config: &StapConfig) -> Arc<dyn CommandEscalator> {
    if config.escalation.mode == EscalationMode::Shell || running_as_root() {
        tracing::info!("[Runner] Using plain shell for privileged scripts");
        Arc::new(ShellEscalator)
    } else {
        Arc::new(SuEscalator::new(&config.escalation.su_path))
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

/// 컨트롤러가 의존하는 실행기 인터페이스 (테스트에서 교체)
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, command: &'a str, input: &'a [String]) -> BoxFuture<'a, CommandOutcome>;
}

pub struct PrivilegedRunner {
    escalator: Arc<dyn CommandEscalator>,
}

impl PrivilegedRunner {
    pub fn new(escalator: Arc<dyn CommandEscalator>) -> Self {
        Self { escalator }
    }

    /// 실패는 모두 [`SPAWN_FAILED`] 또는 0 이 아닌 종료 코드로 돌려주며 패닉하지 않습니다.
    pub async fn execute(&self, command: &str, input: &[String]) -> CommandOutcome {
        tracing::info!("[Runner] Try to run \"{}\" as root", command);

        let mut cmd = self.escalator.command(command);
        cmd.stdin(if input.is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("[Runner] Could not spawn \"{}\": {}", command, e);
                return CommandOutcome::spawn_failed();
            }
        };

        // 파이프가 가득 차서 막히지 않도록 stderr 는 항상 비워 둡니다
        let stderr_pipe = child.stderr.take();
        let stderr_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(pipe) = stderr_pipe {
                let mut reader = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if lines.len() < MAX_STDERR_LINES {
                        lines.push(line);
                    }
                }
            }
            lines
        });

        if let Some(mut stdin) = child.stdin.take() {
            for line in input {
                let data = format!("{}\n", line);
                if let Err(e) = stdin.write_all(data.as_bytes()).await {
                    tracing::warn!("[Runner] \"{}\" closed its input early: {}", command, e);
                    break;
                }
            }
            let _ = stdin.shutdown().await;
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("[Runner] Failed to wait for \"{}\": {}", command, e);
                return CommandOutcome::spawn_failed();
            }
        };

        let exit_code = exit_code_of(status);
        if exit_code == 0 {
            tracing::info!("[Runner] \"{}\" terminated successfully", command);
            return CommandOutcome {
                exit_code,
                stderr: Vec::new(),
            };
        }

        let stderr = match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr_handle).await {
            Ok(Ok(lines)) => lines,
            _ => Vec::new(),
        };
        tracing::error!(
            "[Runner] Error while running \"{}\" as root (exit {}):",
            command,
            exit_code
        );
        for line in &stderr {
            tracing::error!("[Runner] {}", line);
        }
        CommandOutcome { exit_code, stderr }
    }
}

impl CommandRunner for PrivilegedRunner {
    fn run<'a>(&'a self, command: &'a str, input: &'a [String]) -> BoxFuture<'a, CommandOutcome> {
        Box::pin(self.execute(command, input))
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    // 시그널로 죽은 경우 셸 관례대로 128 + signo
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(SPAWN_FAILED)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SPAWN_FAILED)
}
