//! Domain types - core business entities
//!
//! Endpoint records, the observations that feed them, and configuration.
//! These types are independent of the store transport and the discovery tool.

pub mod config;
pub mod endpoint;
