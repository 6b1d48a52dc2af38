//! Scheduler Module
//!
//! Long-running background loops: the reconciliation loop that scales runners to
//! queued demand and the cleanup sweeper that tears finished runners down. Both
//! stop when the shared cancellation token fires.

pub mod reconciler;
pub mod sweeper;

pub use reconciler::Reconciler;
pub use sweeper::CleanupSweeper;
