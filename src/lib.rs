//! Blue-green and canary release control for a single Kubernetes service

pub mod config;
pub mod controller;
pub mod orchestrator;
pub mod shutdown;
pub mod state;
