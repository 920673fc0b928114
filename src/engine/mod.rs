//! Idempotent provisioning core: detect state, converge, wait, verify, and run
//! steps in order.

pub mod converge;
pub mod descriptor;
pub mod pipeline;
pub mod poll;
pub mod probe;
pub mod report;
pub mod verify;

pub use converge::{Action, Applier, ConvergeOutcome};
pub use descriptor::{DesiredSpec, ResourceDescriptor, ResourceKind, RestLookup};
pub use pipeline::{CancelFlag, Pipeline, RunObserver, Runner, Step, Target, Wait};
pub use poll::{PollPolicy, Readiness, ReadinessCheck};
pub use probe::{ProbeState, Prober};
pub use report::{RunReport, RunStatus, StepResult, StepStatus};
pub use verify::{Assertion, Check, CheckOutcome, VerificationReport};
