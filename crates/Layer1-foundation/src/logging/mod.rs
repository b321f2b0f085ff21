//! Logging - 구조화된 한 줄 로그
//!
//! stderr 와 일 단위 로그 파일(`logs/bot-YYYYMMDD.log`)에 같은 줄을 기록한다.

mod format;
mod writer;

pub use format::{component_of, level_name, render_line, KeyValueFormat};
pub use writer::{DailyFile, DailyFileWriter};

use crate::{Error, Result};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 로깅 설정
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// 최소 출력 레벨
    pub level: LevelFilter,
    /// 로그 디렉토리 (존재할 때만 파일 기록)
    pub log_dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn new(level: &str) -> Self {
        Self {
            level: parse_level(level),
            log_dir: None,
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// DEBUG|INFO|WARN|ERROR (대소문자 무시), 그 외는 INFO
pub fn parse_level(s: &str) -> LevelFilter {
    match s.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => LevelFilter::DEBUG,
        "INFO" => LevelFilter::INFO,
        "WARN" | "WARNING" => LevelFilter::WARN,
        "ERROR" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// 전역 subscriber 설치
pub fn init(settings: LogSettings) -> Result<()> {
    let file_layer = settings.log_dir.map(|dir| {
        tracing_subscriber::fmt::layer()
            .event_format(KeyValueFormat)
            .with_ansi(false)
            .with_writer(DailyFileWriter::new(dir, "bot"))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::new(settings.level.to_string()))
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(KeyValueFormat)
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::DEBUG);
        assert_eq!(parse_level("WARN"), LevelFilter::WARN);
        assert_eq!(parse_level("error"), LevelFilter::ERROR);
        assert_eq!(parse_level("verbose"), LevelFilter::INFO);
        assert_eq!(parse_level(""), LevelFilter::INFO);
    }

    #[test]
    fn test_settings_builder() {
        let settings = LogSettings::new("warn").with_log_dir("/tmp/logs");
        assert_eq!(settings.level, LevelFilter::WARN);
        assert_eq!(settings.log_dir, Some(PathBuf::from("/tmp/logs")));
    }
}
