//! Core domain types for the quarry task worker.
//!
//! This crate carries the pure, platform-independent vocabulary of the
//! worker: task identity and payload types, worker configuration, the
//! task-visible log interface, and fault classification for execution
//! errors. Runtime concerns (OS identity, login sessions, command launch)
//! live in `quarry-worker`.

pub mod config;
pub mod fault;
pub mod log;
pub mod payload;
pub mod task;

pub use config::WorkerConfig;
pub use fault::{ExecutionErrors, FaultDomain, TaskError};
pub use payload::TaskPayload;
pub use task::{Task, TaskId};
