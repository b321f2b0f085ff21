//! # keeper-foundation
//!
//! Foundation layer for Botkeeper:
//! - Error: 중앙 에러 타입 (fatal / recoverable 분류)
//! - Config: 환경 변수 기반 설정 + 사전 점검
//! - Logging: `k=v` 한 줄 로그 (stderr + 일 단위 파일)
//! - Storage: 세션 ID 파일
//! - Registry: 에이전트용 런타임 MCP 설정

pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{preflight, require_tool, ContainerRuntime, KeeperConfig};

// ============================================================================
// Logging / Storage / Registry
// ============================================================================
pub use logging::{LogSettings, KeyValueFormat};
pub use registry::{McpConfig, McpServer, McpTransport};
pub use storage::SessionStore;
