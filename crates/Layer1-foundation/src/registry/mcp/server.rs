use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// 데몬 컨테이너가 노출하는 MCP 서버의 논리 이름
pub const DISCORD_SERVER: &str = "discord";

/// MCP 서버 전송 방식 (데몬은 Streamable HTTP 만 제공)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    Http,
}

/// 개별 MCP 서버 설정
///
/// 런타임 설정 파일에 기록되는 형식:
/// ```json
/// { "type": "http", "url": "http://localhost:8080/mcp" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct McpServer {
    #[serde(rename = "type")]
    pub transport: McpTransport,
    pub url: String,
}

impl McpServer {
    /// http 타입 서버 생성
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: McpTransport::Http,
            url: url.into(),
        }
    }
}

/// 에이전트에 전달하는 MCP 설정 파일
///
/// ```json
/// {
///   "mcpServers": {
///     "discord": { "type": "http", "url": "http://localhost:8080/mcp" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct McpConfig {
    #[serde(default, rename = "mcpServers")]
    pub servers: BTreeMap<String, McpServer>,
}

impl McpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 로컬 데몬 하나만 가리키는 런타임 설정
    pub fn for_daemon(url: impl Into<String>) -> Self {
        let mut config = Self::new();
        config.add(DISCORD_SERVER, McpServer::http(url));
        config
    }

    /// 서버 추가
    pub fn add(&mut self, name: impl Into<String>, server: McpServer) {
        self.servers.insert(name.into(), server);
    }

    /// 파일로 기록 (매 시작 시 새로 덮어씀)
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        std::fs::write(path, content)?;
        info!(path = %path.display(), "Generated runtime MCP config");
        Ok(())
    }
}
