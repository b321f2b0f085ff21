//! Config - 통합 설정 관리
//!
//! - `keeper.rs` - KeeperConfig (환경 변수 기반)
//! - `preflight.rs` - 리소스 확보 전 사전 점검

mod keeper;
mod preflight;

pub use keeper::{
    daily_log_path, ContainerRuntime, KeeperConfig, DEFAULT_CONTAINER_NAME, DEFAULT_MAX_FAILURES,
    DEFAULT_MCP_PORT, DEFAULT_POLL_TIMEOUT_SECS, ENV_DISCORD_TOKEN, ENV_GUILD_ID, ENV_LOG_LEVEL,
    ENV_PLUGIN_DIR, LOG_DIR, REQUIRED_ENV, RUNTIME_MCP_FILE, SESSION_FILE,
};
pub use preflight::{preflight, require_tool};
