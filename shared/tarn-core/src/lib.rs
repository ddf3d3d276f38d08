//! Tarn Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Standard service trait the gateway microservices implement
//! - Common domain types (MessageId, Msisdn, statuses)
//! - Error handling utilities

pub mod domain;
pub mod error;
pub mod service;

pub use domain::*;
pub use error::{Result, TarnError};
pub use service::{DependencyStatus, HealthStatus, MicroserviceRuntime, ReadinessStatus, TarnService};
