//! Orchestrator services: ingestion, tool surface, agent runner, deployments.

pub mod agent_runner;
pub mod deployment_service;
pub mod github_service;
pub mod incident_service;
pub mod log_store;
pub mod remediation_service;
pub mod store;
pub mod tools;
