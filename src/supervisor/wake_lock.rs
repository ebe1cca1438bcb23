//! 배타 자원 (wake lock): 모듈이 하나라도 실행 중이면 기기가 잠들지 않게 합니다.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::WakeLockConfig;

pub trait ExclusiveResource: Send + Sync {
    /// 이미 잡혀 있으면 아무것도 하지 않음
    fn acquire(&self) -> io::Result<()>;

    /// 잡혀 있지 않으면 아무것도 하지 않음 (에러 아님)
    fn release(&self) -> io::Result<()>;

    fn is_held(&self) -> bool;
}

/// Linux/Android 커널의 `/sys/power/wake_lock` 인터페이스
pub struct SysfsWakeLock {
    name: String,
    sysfs_dir: PathBuf,
    held: AtomicBool,
}

impl SysfsWakeLock {
    pub fn new(config: &WakeLockConfig) -> Self {
        Self {
            name: config.name.clone(),
            sysfs_dir: config.sysfs_dir.clone(),
            held: AtomicBool::new(false),
        }
    }

    fn write_node(&self, node: &str) -> io::Result<()> {
        let path = self.sysfs_dir.join(node);
        std::fs::write(&path, self.name.as_bytes())
    }
}

impl ExclusiveResource for SysfsWakeLock {
    fn acquire(&self) -> io::Result<()> {
        if self.held.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.write_node("wake_lock")?;
        self.held.store(true, Ordering::SeqCst);
        tracing::info!("[WakeLock] Acquired '{}'", self.name);
        Ok(())
    }

    fn release(&self) -> io::Result<()> {
        if !self.held.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.write_node("wake_unlock")?;
        self.held.store(false, Ordering::SeqCst);
        tracing::info!("[WakeLock] Released '{}'", self.name);
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

/// wake lock 인터페이스가 없는 환경용: 보유 여부만 추적
#[derive(Default)]
pub struct NullWakeLock {
    held: AtomicBool,
}

impl ExclusiveResource for NullWakeLock {
    fn acquire(&self) -> io::Result<()> {
        self.held.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> io::Result<()> {
        self.held.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}
