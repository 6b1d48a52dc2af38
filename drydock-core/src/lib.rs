//! Drydock Core
//!
//! Core types for the Drydock ephemeral runner orchestrator.
//!
//! This crate contains:
//! - Domain types: runners, scopes, lifecycle statuses, demand snapshots
//! - DTOs: request and response shapes used by the command adapter and its façade

pub mod domain;
pub mod dto;
