//! Hive: a swarm coordinator that drives autonomous agents through
//! persistent multi-step missions (teloi), with durable checkpointing,
//! per-instance execution leases, bounded concurrency and crash recovery.

pub mod core;
pub mod database;
pub mod executor;
pub mod providers;
pub mod runner;
pub mod scheduler;
pub mod telos;
