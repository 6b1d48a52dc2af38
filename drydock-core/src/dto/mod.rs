//! Data Transfer Objects exchanged with the façade
//!
//! DTOs are lightweight representations of domain entities shaped for the
//! HTTP boundary.

pub mod runner;
