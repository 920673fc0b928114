use std::fmt::Write;
use std::io;
use std::path::Path;

use comfy_table::Cell;

use super::styling::{bright, bright_green, bright_red, bright_yellow, cyan, dim, run_status};
use super::tables::{
    create_cyan_header, create_table, format_elapsed, outcome_cell, state_cell, status_cell,
};
use crate::credentials::CredentialSet;
use crate::engine::{ProbeState, RunReport, VerificationReport};

/// Prints the outcome of a pipeline run to stdout: one row per step that ran,
/// then the overall status line.
pub fn print_run_summary(report: &RunReport) {
    println!("{}", render_run_summary(report));
}

/// Prints the checks of every step, as run by `verify`.
pub fn print_verification(pipeline: &str, steps: &[(String, VerificationReport)]) {
    println!("{}", render_verification(pipeline, steps));
}

/// Writes a plain-text results file: one `success`/`failed` line per step
/// with checks, followed by the details of every check that did not pass.
pub fn write_results(path: &Path, steps: &[(String, VerificationReport)]) -> io::Result<()> {
    std::fs::write(path, render_results(steps))
}

/// What `plan` found for one step's target.
pub struct PlanEntry {
    pub step: String,
    pub resource: String,
    pub state: ProbeState,
}

impl PlanEntry {
    fn action(&self) -> &'static str {
        match self.state {
            ProbeState::Absent => "create",
            ProbeState::PresentDivergent => "patch",
            ProbeState::PresentMatching => "none",
            ProbeState::Unknown(_) => "refuse",
        }
    }
}

pub fn print_plan(pipeline: &str, entries: &[PlanEntry]) {
    println!("{}", render_plan(pipeline, entries));
}

/// Prints resolved credentials (masked) and the keys that did not resolve.
pub fn print_credentials(credentials: &CredentialSet) {
    println!("{}", render_credentials(credentials));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn render_run_summary(report: &RunReport) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "📋", "Steps");

    let mut table = create_table();
    table.set_header(create_cyan_header(&["#", "Step", "Status", "Elapsed", "Diagnostics"]));
    for (idx, step) in report.steps().iter().enumerate() {
        let name = if step.best_effort() {
            format!("{}\n(best effort)", step.step_name())
        } else {
            step.step_name().to_string()
        };
        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(name),
            status_cell(step.status()),
            Cell::new(format_elapsed(step.elapsed_ms())),
            Cell::new(step.diagnostics().join("\n")),
        ]);
    }
    let _ = writeln!(output, "{table}\n");

    let finished = report
        .finished_at()
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_default();
    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}",
        dim("Pipeline:"),
        cyan(report.pipeline()),
        dim("Finished:"),
        dim(finished),
        dim("Status:"),
        run_status(report.status())
    );
    if report.cancelled() {
        let _ = writeln!(
            output,
            "  {}",
            bright_yellow("Cancelled before all steps ran; run the pipeline again to continue.")
        );
    }
    output
}

fn render_verification(pipeline: &str, steps: &[(String, VerificationReport)]) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🔎", &format!("Verification: {pipeline}"));

    let mut table = create_table();
    table.set_header(create_cyan_header(&["Step", "Check", "Gating", "Outcome", "Detail"]));
    let mut total = 0;
    let mut passed = 0;
    for (step, report) in steps {
        for (name, entry) in &report.checks {
            total += 1;
            if entry.outcome.is_pass() {
                passed += 1;
            }
            table.add_row(vec![
                Cell::new(step),
                Cell::new(name),
                Cell::new(if entry.gating { "yes" } else { "no" }),
                outcome_cell(&entry.outcome),
                Cell::new(entry.outcome.detail().unwrap_or("")),
            ]);
        }
    }

    if total == 0 {
        let _ = writeln!(output, "  {}", bright_yellow("No checks declared."));
        return output;
    }

    let _ = writeln!(output, "{table}\n");
    let tally = format!("{passed}/{total} checks passed");
    let _ = writeln!(
        output,
        "  {}",
        if passed == total {
            bright_green(tally)
        } else {
            bright_red(tally)
        }
    );
    output
}

fn render_results(steps: &[(String, VerificationReport)]) -> String {
    let mut output = String::new();
    let mut passed = 0;
    for (step, report) in steps {
        if report.all_passed() {
            passed += 1;
            let _ = writeln!(output, "{step} success");
            continue;
        }
        let _ = writeln!(output, "{step} failed");
        for (name, entry) in &report.checks {
            if let Some(detail) = entry.outcome.detail() {
                let _ = writeln!(output, "  {name}: {} ({detail})", entry.outcome);
            }
        }
    }
    let _ = writeln!(output, "{passed}/{} steps passed", steps.len());
    output
}

fn render_plan(pipeline: &str, entries: &[PlanEntry]) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🗺️", &format!("Plan: {pipeline}"));

    if entries.is_empty() {
        let _ = writeln!(output, "  {}", bright_yellow("No step manages a resource."));
        return output;
    }

    let mut table = create_table();
    table.set_header(create_cyan_header(&["Step", "Resource", "State", "Action"]));
    for entry in entries {
        table.add_row(vec![
            Cell::new(&entry.step),
            Cell::new(&entry.resource),
            state_cell(&entry.state),
            Cell::new(entry.action()),
        ]);
    }
    let _ = writeln!(output, "{table}");
    output
}

fn render_credentials(credentials: &CredentialSet) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🔑", "Credentials");

    let mut table = create_table();
    table.set_header(create_cyan_header(&["Key", "Value", "Source"]));
    for credential in credentials.resolved() {
        table.add_row(vec![
            Cell::new(&credential.key),
            Cell::new(&credential.value),
            Cell::new(credential.source),
        ]);
    }
    let _ = writeln!(output, "{table}");

    for (key, message) in credentials.failures() {
        let _ = writeln!(output, "  {} {}", bright_red(key), dim(message));
    }
    output
}
