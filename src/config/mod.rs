//! 데몬 설정: `config/stap.toml` (또는 `$STAP_CONFIG`) 에서 로드합니다.
//!
//! 모든 필드에 기본값이 있으므로 파일이 없어도 동작합니다.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 기본 설정 파일 경로
pub const DEFAULT_CONFIG_PATH: &str = "config/stap.toml";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StapConfig {
    /// IPC HTTP 서버 주소
    pub ipc_listen: String,
    pub paths: PathsConfig,
    pub scripts: ScriptsConfig,
    pub timing: TimingConfig,
    pub wake_lock: WakeLockConfig,
    pub escalation: EscalationConfig,
    pub probe: ProbeConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// 컴파일된 모듈(`<name><module_ext>`)이 있는 디렉토리
    pub modules_dir: PathBuf,
    pub module_ext: String,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    /// pid 파일(`<name><pid_ext>`) 디렉토리
    pub run_dir: PathBuf,
    /// 스크립트와 busybox 가 설치된 런타임 지원 디렉토리
    pub support_dir: PathBuf,
    pub pid_ext: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ScriptsConfig {
    /// support_dir 기준 상대 경로
    pub start: String,
    pub kill: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TimingConfig {
    pub timer_initial_delay_ms: u64,
    pub timer_period_ms: u64,
    pub start_grace_ms: u64,
    pub stop_grace_ms: u64,
    pub readiness_backoff_ms: u64,
    pub readiness_backoff_max_ms: u64,
    pub readiness_deadline_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WakeLockConfig {
    pub enabled: bool,
    pub name: String,
    pub sysfs_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EscalationMode {
    Su,
    Shell,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EscalationConfig {
    pub mode: EscalationMode,
    pub su_path: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeBackend {
    Sysinfo,
    Pidof,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProbeConfig {
    /// 모듈 로더가 띄우는 프로세스 이름
    pub process_name: String,
    pub backend: ProbeBackend,
    /// `pidof` 백엔드에서 사용하는 busybox (support_dir 기준 상대 경로)
    pub busybox: String,
}

impl Default for StapConfig {
    fn default() -> Self {
        Self {
            ipc_listen: "127.0.0.1:57480".to_string(),
            paths: PathsConfig::default(),
            scripts: ScriptsConfig::default(),
            timing: TimingConfig::default(),
            wake_lock: WakeLockConfig::default(),
            escalation: EscalationConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = PathBuf::from("/sdcard/systemtap");
        Self {
            modules_dir: base.join("modules"),
            module_ext: ".ko".to_string(),
            output_dir: base.join("output"),
            log_dir: base.join("logs"),
            run_dir: base.join("run"),
            support_dir: PathBuf::from("/data/local/stap"),
            pid_ext: ".pid".to_string(),
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            start: "start_stap.sh".to_string(),
            kill: "kill_stap.sh".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            timer_initial_delay_ms: 10_000,
            timer_period_ms: 30_000,
            start_grace_ms: 900,
            stop_grace_ms: 700,
            readiness_backoff_ms: 100,
            readiness_backoff_max_ms: 1_000,
            readiness_deadline_ms: 5_000,
        }
    }
}

impl Default for WakeLockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "stap-core".to_string(),
            sysfs_dir: PathBuf::from("/sys/power"),
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            mode: EscalationMode::Su,
            su_path: "su".to_string(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            process_name: "stapio".to_string(),
            backend: ProbeBackend::Sysinfo,
            busybox: "busybox".to_string(),
        }
    }
}

impl StapConfig {
    /// `$STAP_CONFIG` 또는 기본 경로에서 로드. 파일이 없으면 기본값.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("STAP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::load_from(Path::new(&path))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)?;
        Self::from_toml(&s)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// 테스트/개발용 환경 변수 오버라이드
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("STAP_MODULES_PATH") {
            self.paths.modules_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("STAP_RUN_PATH") {
            self.paths.run_dir = PathBuf::from(dir);
        }
    }

    /// 모듈 바이너리 경로: `<modules_dir>/<name><module_ext>`
    pub fn module_path(&self, name: &str) -> PathBuf {
        self.paths
            .modules_dir
            .join(format!("{}{}", name, self.paths.module_ext))
    }

    pub fn start_script(&self) -> PathBuf {
        self.paths.support_dir.join(&self.scripts.start)
    }

    pub fn kill_script(&self) -> PathBuf {
        self.paths.support_dir.join(&self.scripts.kill)
    }

    pub fn busybox_path(&self) -> PathBuf {
        self.paths.support_dir.join(&self.probe.busybox)
    }
}

impl TimingConfig {
    pub fn timer_initial_delay(&self) -> Duration {
        Duration::from_millis(self.timer_initial_delay_ms)
    }

    pub fn timer_period(&self) -> Duration {
        Duration::from_millis(self.timer_period_ms)
    }
}
