//! pid 파일: 로더가 성공적으로 시작되면 `<run_dir>/<module><pid_ext>` 에
//! 첫 줄로 10진 pid 를 기록합니다. 이 엔진은 읽기와 (stale 일 때) 삭제만 합니다.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PidFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is empty")]
    Empty { path: String },

    #[error("{path} does not contain a pid: {content:?}")]
    Malformed { path: String, content: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn for_module(run_dir: &Path, module: &str, pid_ext: &str) -> Self {
        Self::new(run_dir.join(format!("{}{}", module, pid_ext)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// 첫 줄을 pid 로 파싱
    pub fn read_pid(&self) -> Result<u32, PidFileError> {
        let display = self.path.display().to_string();
        let content = std::fs::read_to_string(&self.path).map_err(|source| PidFileError::Io {
            path: display.clone(),
            source,
        })?;
        let first = content.lines().next().map(str::trim).unwrap_or("");
        if first.is_empty() {
            return Err(PidFileError::Empty { path: display });
        }
        first.parse::<u32>().map_err(|_| PidFileError::Malformed {
            path: display,
            content: first.to_string(),
        })
    }

    /// 삭제. 이미 없으면 Ok(false).
    pub fn remove(&self) -> std::io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// run_dir 안의 pid 파일에서 모듈 이름 목록을 추출
pub fn scan_module_names(run_dir: &Path, pid_ext: &str) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = match std::fs::read_dir(run_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(name) = file_name.strip_suffix(pid_ext) {
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
