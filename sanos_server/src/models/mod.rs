//! Orchestrator data models.

pub mod analysis;
pub mod app;
pub mod incident;
