use std::fmt::Display;

use console::{style, StyledObject};

use crate::engine::{RunStatus, StepStatus};

pub fn bright_yellow(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_green(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_red(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn cyan(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bright(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn magenta_bold(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

/// Overall run status: green on success, yellow when only best-effort steps
/// failed, red otherwise.
pub fn run_status(status: RunStatus) -> StyledObject<String> {
    match status {
        RunStatus::Success => bright_green(status),
        RunStatus::PartialSuccess => bright_yellow(status),
        RunStatus::Failed => bright_red(status),
    }
}

/// Final spinner line for a step. Unchanged steps are dimmed.
pub fn step_line(label: &str, status: StepStatus) -> StyledObject<String> {
    match status {
        StepStatus::Skipped => dim(format!("{label} (unchanged) ✓")),
        status if status.is_failure() => bright_red(format!("{label} ({status}) ✗")),
        status => bright_green(format!("{label} ({status}) ✓")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_line_marks_outcome() {
        let unchanged = step_line("Step 1/2: rbac", StepStatus::Skipped).to_string();
        assert!(unchanged.contains("Step 1/2: rbac (unchanged) ✓"));

        let failed = step_line("Step 2/2: metrics", StepStatus::HardFailure).to_string();
        assert!(failed.contains("Step 2/2: metrics"));
        assert!(failed.contains('✗'));
    }
}
