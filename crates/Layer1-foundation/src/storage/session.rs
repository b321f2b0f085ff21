//! 세션 ID 파일 저장소
//!
//! 한 줄짜리 평문 파일. 항상 덮어쓰며, 추가(append)하지 않는다.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// 세션 레코드 저장소
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 파일 존재 여부
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// 저장된 세션 ID 로드 (없거나 비어 있으면 None)
    pub fn load(&self) -> Result<Option<String>> {
        if !self.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Storage(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let id = content.trim();
        Ok((!id.is_empty()).then(|| id.to_string()))
    }

    /// 세션 ID 저장 (임시 파일 후 rename 으로 덮어쓰기)
    pub fn save(&self, session_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create directory: {}", e))
            })?;
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, format!("{}\n", session_id.trim()))
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            Error::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })
    }

    /// 파일 삭제 (없어도 성공)
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
