use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::engine::{CheckOutcome, ProbeState, StepStatus};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn status_cell(status: StepStatus) -> Cell {
    let color = match status {
        StepStatus::Skipped => TableColor::DarkGrey,
        StepStatus::Applied | StepStatus::Converged => TableColor::Green,
        StepStatus::TimedOut | StepStatus::VerificationFailed => TableColor::Yellow,
        StepStatus::HardFailure => TableColor::Red,
    };
    Cell::new(status).fg(color)
}

pub fn outcome_cell(outcome: &CheckOutcome) -> Cell {
    let color = match outcome {
        CheckOutcome::Pass => TableColor::Green,
        CheckOutcome::Fail(_) => TableColor::Red,
        CheckOutcome::Inconclusive(_) => TableColor::Yellow,
    };
    Cell::new(outcome).fg(color)
}

pub fn state_cell(state: &ProbeState) -> Cell {
    let color = match state {
        ProbeState::PresentMatching => TableColor::Green,
        ProbeState::Absent | ProbeState::PresentDivergent => TableColor::Yellow,
        ProbeState::Unknown(_) => TableColor::Red,
    };
    Cell::new(state).fg(color)
}

/// Millisecond durations as `850ms`, `12.4s` or `3m 05s`.
pub fn format_elapsed(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        #[allow(clippy::cast_precision_loss)]
        let secs = ms as f64 / 1_000.0;
        format!("{secs:.1}s")
    } else {
        let secs = ms / 1_000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(850), "850ms");
        assert_eq!(format_elapsed(12_400), "12.4s");
        assert_eq!(format_elapsed(185_000), "3m 05s");
    }
}
