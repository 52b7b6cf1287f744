//! The swarm scheduler: the outer loop that hands eligible instances to
//! runners under a concurrency bound.

pub mod scheduler;

pub use scheduler::SwarmScheduler;
