//! Registry - 외부 도구 등록
//!
//! - `mcp/` - 에이전트에 전달하는 MCP 서버 설정

pub mod mcp;

pub use mcp::{McpConfig, McpServer, McpTransport, DISCORD_SERVER};
