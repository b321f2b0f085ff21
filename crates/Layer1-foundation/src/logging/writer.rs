//! Daily log file writer

use crate::config::daily_log_path;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;

/// Appends each event to `<dir>/<prefix>-YYYYMMDD.log` (UTC date).
///
/// Nothing is written while the directory does not exist.
#[derive(Debug, Clone)]
pub struct DailyFileWriter {
    dir: PathBuf,
    prefix: String,
}

impl DailyFileWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    fn open(&self) -> Option<File> {
        if !self.dir.is_dir() {
            return None;
        }
        let path = daily_log_path(&self.dir, &self.prefix, Utc::now());
        OpenOptions::new().create(true).append(true).open(path).ok()
    }
}

impl<'a> MakeWriter<'a> for DailyFileWriter {
    type Writer = DailyFile;

    fn make_writer(&'a self) -> Self::Writer {
        DailyFile(self.open())
    }
}

/// Handle for one event; a no-op sink when the file could not be opened
pub struct DailyFile(Option<File>);

impl io::Write for DailyFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.0 {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.0 {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
