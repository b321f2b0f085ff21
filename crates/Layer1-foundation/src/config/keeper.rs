//! Keeper Config - 환경 변수 기반 통합 설정
//!
//! 모든 값은 `BOTKEEPER_*` 환경 변수에서 읽는다 (`.env` 로딩은 바이너리 담당).

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// 환경 변수 이름
// ============================================================================

pub const ENV_DISCORD_TOKEN: &str = "BOTKEEPER_DISCORD_TOKEN";
pub const ENV_GUILD_ID: &str = "BOTKEEPER_DISCORD_GUILD_ID";
pub const ENV_POLL_TIMEOUT: &str = "BOTKEEPER_POLL_TIMEOUT";
pub const ENV_MAX_FAILURES: &str = "BOTKEEPER_MAX_FAILURES";
pub const ENV_MCP_PORT: &str = "BOTKEEPER_MCP_PORT";
pub const ENV_LOG_LEVEL: &str = "BOTKEEPER_LOG_LEVEL";
pub const ENV_PLUGIN_DIR: &str = "BOTKEEPER_PLUGIN_DIR";
pub const ENV_CONTAINER_NAME: &str = "BOTKEEPER_CONTAINER_NAME";
pub const ENV_IMAGE: &str = "BOTKEEPER_IMAGE";
pub const ENV_EXTRA_IMAGES: &str = "BOTKEEPER_EXTRA_IMAGES";
pub const ENV_PLATFORM: &str = "BOTKEEPER_PLATFORM";
pub const ENV_AGENT_BIN: &str = "BOTKEEPER_AGENT_BIN";
pub const ENV_CONTAINER_RUNTIME: &str = "BOTKEEPER_CONTAINER_RUNTIME";

/// 필수 환경 변수 (컨테이너에도 그대로 전달됨)
pub const REQUIRED_ENV: [&str; 2] = [ENV_DISCORD_TOKEN, ENV_GUILD_ID];

// ============================================================================
// 기본값
// ============================================================================

pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_FAILURES: u32 = 5;
pub const DEFAULT_MCP_PORT: u16 = 8080;
pub const DEFAULT_CONTAINER_NAME: &str = "botkeeper-mcp-daemon";
pub const DEFAULT_IMAGE: &str = "ghcr.io/jamesprial/claudebot-mcp:latest";
pub const DEFAULT_EXTRA_IMAGES: &str = "ghcr.io/jamesprial/go-scream:latest";
pub const DEFAULT_PLATFORM: &str = "linux/arm64";
pub const DEFAULT_AGENT_BIN: &str = "claude";

/// 세션 ID 파일명 (플러그인 디렉토리 기준)
pub const SESSION_FILE: &str = ".bot-session-id";

/// 런타임 MCP 설정 파일명
pub const RUNTIME_MCP_FILE: &str = ".mcp.runtime.json";

/// 로그 디렉토리명
pub const LOG_DIR: &str = "logs";

/// Container runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    #[default]
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Get the CLI command for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Some(Self::Docker),
            "podman" => Some(Self::Podman),
            _ => None,
        }
    }
}

/// Botkeeper 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// 채팅 플랫폼 봇 토큰 (필수)
    #[serde(skip_serializing)]
    pub discord_token: String,

    /// 대상 커뮤니티(길드) ID (필수)
    pub guild_id: String,

    /// 폴링 타임아웃 (초) - 백오프 상한으로도 사용
    pub poll_timeout_secs: u64,

    /// 연속 실패 허용 횟수
    pub max_failures: u32,

    /// 로컬 MCP 서비스 포트
    pub mcp_port: u16,

    /// 최소 로그 레벨 (DEBUG|INFO|WARN|ERROR)
    pub log_level: String,

    /// 플러그인 / 작업 디렉토리
    pub plugin_dir: PathBuf,

    /// 워커 컨테이너 논리 이름
    pub container_name: String,

    /// 데몬 이미지
    pub image: String,

    /// 부가 이미지 (pull 실패 시 경고만)
    pub extra_images: Vec<String>,

    /// 이미지 플랫폼
    pub platform: Option<String>,

    /// 에이전트 CLI 바이너리
    pub agent_bin: String,

    /// 컨테이너 런타임
    pub container_runtime: ContainerRuntime,
}

impl KeeperConfig {
    /// 프로세스 환경 변수에서 로드
    pub fn from_env(default_plugin_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::from_lookup(default_plugin_dir, |key| std::env::var(key).ok())
    }

    /// 임의의 조회 함수로 로드 (테스트 주입용)
    pub fn from_lookup<F>(default_plugin_dir: impl Into<PathBuf>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let required = |key: &str| {
            get(key).ok_or_else(|| Error::Preflight(format!("Required env var is not set: {}", key)))
        };

        let discord_token = required(ENV_DISCORD_TOKEN)?;
        let guild_id = required(ENV_GUILD_ID)?;

        let poll_timeout_secs = parse_or(get(ENV_POLL_TIMEOUT), ENV_POLL_TIMEOUT, DEFAULT_POLL_TIMEOUT_SECS)?;
        let max_failures = parse_or(get(ENV_MAX_FAILURES), ENV_MAX_FAILURES, DEFAULT_MAX_FAILURES)?;
        if max_failures == 0 {
            return Err(Error::Config(format!("{} must be at least 1", ENV_MAX_FAILURES)));
        }
        let mcp_port = parse_or(get(ENV_MCP_PORT), ENV_MCP_PORT, DEFAULT_MCP_PORT)?;

        let container_runtime = match get(ENV_CONTAINER_RUNTIME) {
            Some(raw) => ContainerRuntime::parse(&raw).ok_or_else(|| {
                Error::Config(format!("Unknown container runtime '{}'", raw))
            })?,
            None => ContainerRuntime::default(),
        };

        let extra_images = get(ENV_EXTRA_IMAGES)
            .unwrap_or_else(|| DEFAULT_EXTRA_IMAGES.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            discord_token,
            guild_id,
            poll_timeout_secs,
            max_failures,
            mcp_port,
            log_level: get(ENV_LOG_LEVEL).unwrap_or_else(|| "INFO".to_string()),
            plugin_dir: get(ENV_PLUGIN_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| default_plugin_dir.into()),
            container_name: get(ENV_CONTAINER_NAME)
                .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string()),
            image: get(ENV_IMAGE).unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            extra_images,
            // "none" 으로 플랫폼 지정 해제
            platform: match get(ENV_PLATFORM) {
                Some(p) if p.eq_ignore_ascii_case("none") => None,
                Some(p) => Some(p),
                None => Some(DEFAULT_PLATFORM.to_string()),
            },
            agent_bin: get(ENV_AGENT_BIN).unwrap_or_else(|| DEFAULT_AGENT_BIN.to_string()),
            container_runtime,
        })
    }

    // ========================================================================
    // 파생 값
    // ========================================================================

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.plugin_dir.join(LOG_DIR)
    }

    pub fn session_file(&self) -> PathBuf {
        self.plugin_dir.join(SESSION_FILE)
    }

    pub fn runtime_mcp_path(&self) -> PathBuf {
        self.plugin_dir.join(RUNTIME_MCP_FILE)
    }

    /// 컨테이너 로그 스트림 (일 단위)
    pub fn mcp_log_file(&self, now: DateTime<Utc>) -> PathBuf {
        daily_log_path(&self.log_dir(), "mcp", now)
    }

    /// 로컬 MCP 엔드포인트 URL
    pub fn mcp_url(&self) -> String {
        format!("http://localhost:{}/mcp", self.mcp_port)
    }
}

/// `<dir>/<prefix>-YYYYMMDD.log` (UTC 기준)
pub fn daily_log_path(dir: &Path, prefix: &str, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{}-{}.log", prefix, now.format("%Y%m%d")))
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| Error::Config(format!("Invalid value for {}: '{}'", key, value))),
        None => Ok(default),
    }
}
