//! Telos module: mission templates, per-agent telos instances, agent
//! profiles and the observation journal.

pub mod instance;
pub mod observation;
pub mod registry;
pub mod template;

pub use instance::{AgentTelos, InstanceStore, Lease, StepRecord, StepStatus, TelosSource, TelosState};
pub use observation::{Observation, ObservationSink};
pub use registry::{AgentProfile, AgentRegistry};
pub use template::{TelosTemplate, TemplateStore};
