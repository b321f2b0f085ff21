//! Key-value line format
//!
//! ```text
//! 2026-02-20T14:30:00Z level=INFO component=poll msg="Starting message poll loop" interval=30s
//! ```

use chrono::{DateTime, Utc};
use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// `FormatEvent` producing one `k=v` line per event
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueFormat;

impl<S, N> FormatEvent<S, N> for KeyValueFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let mut visitor = KeyValueVisitor::default();
        event.record(&mut visitor);

        let line = render_line(
            Utc::now(),
            *meta.level(),
            component_of(meta.target()),
            &visitor.message,
            &visitor.fields,
        );
        writeln!(writer, "{}", line)
    }
}

/// Level name as emitted (TRACE folds into DEBUG)
pub fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE | Level::DEBUG => "DEBUG",
        Level::INFO => "INFO",
        Level::WARN => "WARN",
        Level::ERROR => "ERROR",
    }
}

/// Last path segment of a tracing target (`keeper_task::poll` -> `poll`)
pub fn component_of(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

/// Render a single log line
pub fn render_line(
    timestamp: DateTime<Utc>,
    level: Level,
    component: &str,
    message: &str,
    fields: &[(String, String)],
) -> String {
    let mut line = format!(
        "{} level={} component={} msg=\"{}\"",
        timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
        level_name(level),
        component,
        message.replace('"', "\\\"")
    );

    for (key, value) in fields {
        if value.is_empty() || value.contains(char::is_whitespace) {
            let _ = write!(line, " {}=\"{}\"", key, value.replace('"', "\\\""));
        } else {
            let _ = write!(line, " {}={}", key, value);
        }
    }

    line
}

#[derive(Default)]
struct KeyValueVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl KeyValueVisitor {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for KeyValueVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }
}
