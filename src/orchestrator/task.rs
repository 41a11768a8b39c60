use serde::Serialize;
use std::fmt;

use crate::catalog::ChangeAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    Running,
    Success,
    Failed,
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionState::Success | ActionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionState::Pending => "pending",
            ActionState::Running => "running",
            ActionState::Success => "success",
            ActionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state of one change-set entry.
#[derive(Debug, Clone, Serialize)]
pub struct ActionTask {
    pub action: ChangeAction,
    pub state: ActionState,
    pub progress: u8,
    pub message: String,
    pub output: String,
    /// Non-fatal problems, e.g. a failed post-install command.
    pub warnings: Vec<String>,
}

impl ActionTask {
    pub fn new(action: ChangeAction) -> Self {
        Self {
            action,
            state: ActionState::Pending,
            progress: 0,
            message: String::new(),
            output: String::new(),
            warnings: Vec::new(),
        }
    }

    /// Back to pending. Only valid for failed tasks.
    pub(super) fn reset(&mut self) {
        self.state = ActionState::Pending;
        self.progress = 0;
        self.message.clear();
        self.output.clear();
        self.warnings.clear();
    }

    pub fn result(&self) -> ActionResult {
        ActionResult {
            action: self.action.clone(),
            final_state: self.state,
            message: self.message.clone(),
            output: self.output.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub action: ChangeAction,
    pub final_state: ActionState,
    pub message: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ActionResult>,
}

impl RunSummary {
    pub fn from_tasks(tasks: &[ActionTask]) -> Self {
        let results: Vec<ActionResult> = tasks.iter().map(ActionTask::result).collect();
        Self {
            succeeded: results
                .iter()
                .filter(|r| r.final_state == ActionState::Success)
                .count(),
            failed: results
                .iter()
                .filter(|r| r.final_state == ActionState::Failed)
                .count(),
            results,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Installation completed: {} successful, {} failed",
            self.succeeded, self.failed
        )
    }
}

/// Map a 0-100 phase percentage into `lo..=hi`.
pub fn scale_progress(percent: u8, lo: u8, hi: u8) -> u8 {
    let span = u16::from(hi.saturating_sub(lo));
    lo + (span * u16::from(percent.min(100)) / 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Application;

    #[test]
    fn scale_maps_into_phase_window() {
        assert_eq!(scale_progress(0, 40, 70), 40);
        assert_eq!(scale_progress(50, 40, 70), 55);
        assert_eq!(scale_progress(100, 50, 100), 100);
        assert_eq!(scale_progress(250, 70, 100), 100);
    }

    #[test]
    fn reset_clears_task() {
        let mut task = ActionTask::new(ChangeAction::Install(Application::new("git", ["git"])));
        task.state = ActionState::Failed;
        task.progress = 55;
        task.message = "boom".into();
        task.warnings.push("w".into());
        task.reset();
        assert_eq!(task.state, ActionState::Pending);
        assert_eq!(task.progress, 0);
        assert!(task.message.is_empty());
        assert!(task.warnings.is_empty());
    }

    #[test]
    fn summary_counts_and_message() {
        let mut ok = ActionTask::new(ChangeAction::Install(Application::new("a", ["a"])));
        ok.state = ActionState::Success;
        let mut bad = ActionTask::new(ChangeAction::Uninstall(Application::new("b", ["b"])));
        bad.state = ActionState::Failed;

        let summary = RunSummary::from_tasks(&[ok, bad]);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_succeeded());
        assert_eq!(summary.to_string(), "Installation completed: 1 successful, 1 failed");
    }
}
