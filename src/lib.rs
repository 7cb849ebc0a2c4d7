//! Warden - External Authorization and Rate Limiting Service
//!
//! This crate implements an external authorization service that answers
//! request-admission queries from a front-end proxy. Decisions combine
//! CIDR-based allow/deny lists with fixed-window rate limiters whose
//! counters live in a shared Redis store, so multiple instances agree on
//! the same budget.

pub mod authz;
pub mod conf;
pub mod config;
pub mod error;
pub mod grpc;
pub mod metrics;
pub mod store;
