//! Structured console rendering for [`Event`]s and [`ErrorRecord`]s, used by
//! [`StdOutSink`](crate::event_bus::StdOutSink).

use crate::errors::ErrorRecord;
use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta / dark pink
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_errors(&self, errors: &[ErrorRecord]) -> Vec<EventRender>;
}

/// Whether a [`PlainFormatter`] emits ANSI color codes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormatterMode {
    /// Colorize when stdout looks like a terminal, plain otherwise.
    #[default]
    Auto,
    Colored,
    Plain,
}

impl FormatterMode {
    fn use_color(self) -> bool {
        match self {
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
            FormatterMode::Auto => std::io::IsTerminal::is_terminal(&std::io::stdout()),
        }
    }
}

pub struct PlainFormatter {
    mode: FormatterMode,
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self { mode: FormatterMode::Auto }
    }

    #[must_use]
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn colorize(&self, color: &str, text: &str) -> String {
        if self.mode.use_color() {
            format!("{color}{text}{RESET_COLOR}")
        } else {
            text.to_string()
        }
    }
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = format!("{}\n", self.colorize(LINE_COLOR, &event.to_string()));
        EventRender {
            context: event.scope_label().map(ToString::to_string),
            lines: vec![line],
        }
    }

    fn render_errors(&self, errors: &[ErrorRecord]) -> Vec<EventRender> {
        errors
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let scope_str = self.colorize(CONTEXT_COLOR, record.error.kind.label());
                let mut lines = vec![format!("[{}] {} | {}\n", i, record.when, scope_str)];
                lines.push(format!(
                    "{}\n",
                    self.colorize(LINE_COLOR, &format!("  error: {}", record.error))
                ));
                lines.push(format!(
                    "{}\n",
                    self.colorize(
                        LINE_COLOR,
                        &format!("  node: {} severity: {:?}", record.node, record.error.severity)
                    )
                ));
                if !record.error.details.is_null() {
                    lines.push(format!(
                        "{}\n",
                        self.colorize(LINE_COLOR, &format!("  details: {}", record.error.details))
                    ));
                }
                EventRender {
                    context: Some(record.error.kind.label().to_string()),
                    lines,
                }
            })
            .collect()
    }
}
