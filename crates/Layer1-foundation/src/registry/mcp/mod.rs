mod server;

pub use server::{McpConfig, McpServer, McpTransport, DISCORD_SERVER};
