use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// 모듈 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Stopped,
    Running,
    Crashed,
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

/// 이름으로 식별되는 계측 모듈
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub status: ModuleStatus,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ModuleStatus::Stopped,
        }
    }
}

/// 모듈 이름 검증: 경로와 스크립트 입력에 그대로 들어가므로 `[A-Za-z0-9_-]` 만 허용
pub fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// name → status 저장소. 영속화는 구현체의 몫.
pub trait ModuleRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<Module>;

    /// 없으면 STOPPED 상태로 생성
    fn get_or_create(&self, name: &str) -> Module;

    /// 상태를 기록하고 이전 상태를 돌려줍니다 (새로 생성된 경우 None).
    fn set_status(&self, name: &str, status: ModuleStatus) -> Option<ModuleStatus>;

    /// RUNNING 으로 알려진 모듈 이름
    fn running(&self) -> Vec<String>;

    fn list(&self) -> Vec<Module>;
}

/// 프로세스 메모리에만 존재하는 레지스트리
#[derive(Default)]
pub struct InMemoryRegistry {
    modules: Mutex<BTreeMap<String, Module>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Module>> {
        self.modules.lock().unwrap_or_else(|e| {
            tracing::error!("Module registry lock poisoned, recovering");
            e.into_inner()
        })
    }
}

impl ModuleRegistry for InMemoryRegistry {
    fn get(&self, name: &str) -> Option<Module> {
        self.lock().get(name).cloned()
    }

    fn get_or_create(&self, name: &str) -> Module {
        self.lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Registering module '{}'", name);
                Module::new(name)
            })
            .clone()
    }

    fn set_status(&self, name: &str, status: ModuleStatus) -> Option<ModuleStatus> {
        let mut modules = self.lock();
        match modules.get_mut(name) {
            Some(module) => {
                let previous = module.status;
                module.status = status;
                if previous != status {
                    tracing::info!("Module '{}': {} -> {}", name, previous, status);
                }
                Some(previous)
            }
            None => {
                modules.insert(
                    name.to_string(),
                    Module {
                        name: name.to_string(),
                        status,
                    },
                );
                tracing::info!("Module '{}' registered as {}", name, status);
                None
            }
        }
    }

    fn running(&self) -> Vec<String> {
        self.lock()
            .values()
            .filter(|m| m.status == ModuleStatus::Running)
            .map(|m| m.name.clone())
            .collect()
    }

    fn list(&self) -> Vec<Module> {
        self.lock().values().cloned().collect()
    }
}
