//! Error types for Botkeeper
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Botkeeper 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 / 사전 점검
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Preflight check failed: {0}")]
    Preflight(String),

    // ========================================================================
    // 컨테이너 관련
    // ========================================================================
    #[error("Container error: {0}")]
    Container(String),

    #[error("Container {name} did not reach running state after {attempts} checks")]
    ContainerNotRunning { name: String, attempts: u32 },

    #[error("Container {0} exited unexpectedly")]
    ContainerExited(String),

    // ========================================================================
    // 세션 / 에이전트 관련
    // ========================================================================
    #[error("Session initialization failed: {0}")]
    SessionInit(String),

    #[error("Too many consecutive failures: {count}/{max}")]
    TooManyFailures { count: u32, max: u32 },

    /// 종료 요청으로 중단된 작업 (종료 코드는 시그널이 결정)
    #[error("Interrupted by shutdown: {0}")]
    Interrupted(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 프로세스를 종료해야 하는 에러인지 확인 (exit 1)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Preflight(_)
                | Error::Container(_)
                | Error::ContainerNotRunning { .. }
                | Error::ContainerExited(_)
                | Error::SessionInit(_)
                | Error::TooManyFailures { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::ContainerExited("daemon".into()).is_fatal());
        assert!(Error::TooManyFailures { count: 5, max: 5 }.is_fatal());
        assert!(Error::SessionInit("boom".into()).is_fatal());
        assert!(Error::Preflight("missing".into()).is_fatal());
        assert!(!Error::Interrupted("image pull".into()).is_fatal());
        assert!(!Error::Storage("read-only".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = Error::ContainerNotRunning {
            name: "daemon".into(),
            attempts: 30,
        };
        assert_eq!(
            err.to_string(),
            "Container daemon did not reach running state after 30 checks"
        );
    }
}
