//! Line cleanup, presentation classification and result summaries.

use crate::ui::strip_ansi;

/// Presentation category of an output line. Never affects success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Error,
    Warning,
    Package,
    Success,
    Config,
    Normal,
}

impl LineKind {
    pub fn classify(line: &str) -> Self {
        let lower = line.to_lowercase();
        let has = |keys: &[&str]| keys.iter().any(|k| lower.contains(k));

        if has(&["error", "failed", "permission denied", "access denied"]) {
            LineKind::Error
        } else if has(&["warning", "warn"]) {
            LineKind::Warning
        } else if has(&["installing", "downloading"]) {
            LineKind::Package
        } else if has(&["success", "complete", "done"]) {
            LineKind::Success
        } else if has(&["processing", "configuring", "setting up"]) {
            LineKind::Config
        } else {
            LineKind::Normal
        }
    }
}

const FAILURE_KEYWORDS: &[&str] = &[
    "error",
    "failed",
    "permission denied",
    "access denied",
    "cannot",
    "unable",
    "not found",
    "no such",
];

/// Clean one raw line from a child process.
///
/// apt redraws its "Reading database" counter with carriage returns; those
/// become separate lines. Anywhere else `\r` is dropped. Blank parts are
/// discarded, so the result may be empty.
pub fn sanitize(raw: &str) -> Vec<String> {
    let text = strip_ansi(raw);
    let text = text.trim();
    let parts: Vec<&str> = if text.contains("Reading database") && text.contains('\r') {
        text.split('\r').collect()
    } else {
        vec![text]
    };

    parts
        .into_iter()
        .map(|part| part.replace('\r', "").trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Short text describing the outcome of a finished command.
pub fn summarize(lines: &[String], success: bool, code: Option<i32>) -> String {
    if success {
        if lines.is_empty() {
            return "Command executed successfully".to_string();
        }
        return tail(lines, 3).join("\n");
    }

    let error_lines: Vec<&String> = lines
        .iter()
        .filter(|line| {
            let lower = line.to_lowercase();
            FAILURE_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .collect();

    if !error_lines.is_empty() {
        let start = error_lines.len().saturating_sub(3);
        return error_lines[start..]
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join("\n");
    }
    if !lines.is_empty() {
        return tail(lines, 2).join("\n");
    }
    match code {
        Some(code) => format!("Command failed with exit code: {code}"),
        None => "Command terminated by signal".to_string(),
    }
}

fn tail(lines: &[String], n: usize) -> &[String] {
    &lines[lines.len().saturating_sub(n)..]
}
