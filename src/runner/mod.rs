//! The telos runner: holds the execution lease for one instance and drives
//! it step by step, persisting each transition through a version-checked
//! update so a lost lease can never corrupt the row.

pub mod backoff;
pub mod lease;
pub mod runner;

pub use backoff::Backoff;
pub use lease::LeaseKeeper;
pub use runner::TelosRunner;
