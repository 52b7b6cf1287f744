//! Step execution: interpreting opaque step payloads and dispatching them
//! to the external collaborators. The executor runs exactly one attempt and
//! classifies the result; retry policy lives in the runner.

pub mod executor;
pub mod step;

pub use executor::{LlmStepExecutor, StepContext, StepExecutor};
pub use step::{StepOutcome, StepOutcomeStatus, StepSpec};
