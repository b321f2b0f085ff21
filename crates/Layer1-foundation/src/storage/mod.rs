//! Storage module for Botkeeper
//!
//! - `session`: 세션 ID 평문 파일 (재시작 복구용)

mod session;

pub use session::SessionStore;
