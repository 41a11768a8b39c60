use colored::*;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::Mutex;

pub mod progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
    Debug,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Success => "success",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Debug => "debug",
        }
    }
}

/// A structured event recorded by a capturing renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedEvent {
    pub level: Level,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug)]
enum Sink {
    Stdio,
    Capture(Mutex<Vec<CapturedEvent>>),
    Silent,
}

/// Event renderer shared by every engine component.
///
/// Components receive an `Arc<Renderer>` at construction time instead of
/// reaching for a process-wide logger, so tests can swap in [`Renderer::capture`]
/// and assert on the emitted event codes.
#[derive(Debug)]
pub struct Renderer {
    format: OutputFormat,
    color: bool,
    debug: bool,
    sink: Sink,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(OutputFormat::Text, true, false)
    }
}

#[derive(Serialize)]
struct Event<'a> {
    level: &'a str,
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

fn colorize(level: Level, s: &str, enable: bool) -> String {
    if !enable {
        return s.to_string();
    }
    match level {
        Level::Info => s.normal().to_string(),
        Level::Success => s.green().bold().to_string(),
        Level::Warn => s.yellow().bold().to_string(),
        Level::Error => s.red().bold().to_string(),
        Level::Debug => s.cyan().to_string(),
    }
}

/// Remove CSI escape sequences such as `\x1b[0m` or `\x1b[1;32m`.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            // Final byte of a CSI sequence is in @..=~
            for n in chars.by_ref() {
                if ('@'..='~').contains(&n) {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

impl Renderer {
    pub fn new(format: OutputFormat, color: bool, debug: bool) -> Self {
        Self {
            format,
            color,
            debug,
            sink: Sink::Stdio,
        }
    }

    /// Renderer that records every event (debug included) instead of printing.
    pub fn capture() -> Self {
        Self {
            format: OutputFormat::Text,
            color: false,
            debug: true,
            sink: Sink::Capture(Mutex::new(Vec::new())),
        }
    }

    /// Renderer that drops everything.
    pub fn silent() -> Self {
        Self {
            format: OutputFormat::Text,
            color: false,
            debug: false,
            sink: Sink::Silent,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_debug_enabled(&self) -> bool {
        self.debug
    }

    pub fn emit(&self, level: Level, code: &str, message: &str, data: Option<serde_json::Value>) {
        if level == Level::Debug && !self.debug {
            return;
        }

        match &self.sink {
            Sink::Silent => {}
            Sink::Capture(events) => {
                if let Ok(mut events) = events.lock() {
                    events.push(CapturedEvent {
                        level,
                        code: code.to_string(),
                        message: strip_ansi(message),
                        data,
                    });
                }
            }
            Sink::Stdio => self.write_stdio(level, code, message, data),
        }
    }

    fn write_stdio(&self, level: Level, code: &str, message: &str, data: Option<serde_json::Value>) {
        let mut out: Box<dyn Write> = match level {
            Level::Error | Level::Warn => Box::new(io::stderr()),
            _ => Box::new(io::stdout()),
        };
        match self.format {
            OutputFormat::Text => {
                let line = colorize(level, message, self.color);
                let _ = writeln!(out, "{}", line);
            }
            OutputFormat::Json => {
                let clean_msg = strip_ansi(message);
                let ev = Event {
                    level: level.as_str(),
                    code,
                    message: &clean_msg,
                    data,
                };
                if let Ok(s) = serde_json::to_string(&ev) {
                    let _ = writeln!(out, "{}", s);
                }
            }
        }
    }

    pub fn info(&self, code: &str, message: &str) {
        self.emit(Level::Info, code, message, None);
    }

    pub fn success(&self, code: &str, message: &str) {
        self.emit(Level::Success, code, message, None);
    }

    pub fn warn(&self, code: &str, message: &str) {
        self.emit(Level::Warn, code, message, None);
    }

    pub fn error(&self, code: &str, message: &str) {
        self.emit(Level::Error, code, message, None);
    }

    pub fn debug(&self, code: &str, message: &str) {
        self.emit(Level::Debug, code, message, None);
    }

    /// Events recorded so far. Empty unless built with [`Renderer::capture`].
    pub fn events(&self) -> Vec<CapturedEvent> {
        match &self.sink {
            Sink::Capture(events) => events.lock().map(|e| e.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn has_event(&self, code: &str) -> bool {
        self.events().iter().any(|e| e.code == code)
    }
}
