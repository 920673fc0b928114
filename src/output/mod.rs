mod progress;
mod styling;
mod summary;
mod tables;

pub use progress::StepProgress;
use styling::{dim, magenta_bold};
pub use summary::{
    print_credentials, print_plan, print_run_summary, print_verification, write_results, PlanEntry,
};

/// Prints the acs-provision banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🛡️ acs-provision"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Idempotent RHACS provisioning")
    );
}
