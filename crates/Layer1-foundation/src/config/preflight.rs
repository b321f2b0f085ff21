//! Preflight - 외부 도구 존재 여부 점검
//!
//! 필수 환경 변수는 `KeeperConfig` 로드 시 이미 검증된다.

use super::KeeperConfig;
use crate::{Error, Result};
use std::path::PathBuf;
use tracing::debug;

/// PATH 에서 도구를 찾는다
pub fn require_tool(name: &str) -> Result<PathBuf> {
    let path = which::which(name)
        .map_err(|_| Error::Preflight(format!("{} is not installed", name)))?;
    debug!(tool = name, path = %path.display(), "Found required tool");
    Ok(path)
}

/// 에이전트 CLI + 컨테이너 런타임 점검
pub fn preflight(config: &KeeperConfig) -> Result<()> {
    require_tool(&config.agent_bin)?;
    require_tool(config.container_runtime.command())?;
    Ok(())
}
