//! Core domain types
//!
//! This module contains the core domain structures used across Drydock crates.
//! The orchestrator owns their lifecycle; the DTOs in `crate::dto` are what
//! leaves the process.

pub mod demand;
pub mod runner;
