use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::cell::RefCell;

use super::styling::{bright, bright_yellow, step_line};
use crate::engine::{RunObserver, StepResult};

/// One spinner per pipeline step, drawn on stderr.
#[derive(Default)]
pub struct StepProgress {
    current: RefCell<Option<(String, ProgressBar)>>,
}

impl StepProgress {
    pub fn new(pipeline: &str) -> Self {
        eprintln!("{}  {}", bright("⚙️"), bright(pipeline).underlined());
        Self::default()
    }
}

impl RunObserver for StepProgress {
    fn step_started(&self, index: usize, total: usize, name: &str) {
        let label = format!("Step {}/{total}: {name}", index + 1);
        let pb = create_spinner(bright_yellow(&label).to_string());
        *self.current.borrow_mut() = Some((label, pb));
    }

    fn step_finished(&self, result: &StepResult) {
        let Some((label, pb)) = self.current.borrow_mut().take() else {
            return;
        };
        pb.finish_with_message(step_line(&label, result.status()).to_string());
    }
}

impl Drop for StepProgress {
    fn drop(&mut self) {
        if let Some((_, pb)) = self.current.get_mut().take() {
            pb.abandon();
        }
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
