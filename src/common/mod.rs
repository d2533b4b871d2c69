//! # Common Components
//!
//! Shared utilities and data structures used by the coordinator server and
//! the operator client.
//!
//! ## Modules
//!
//! - [`messages`]: request/response bodies for every endpoint
//! - [`error`]: coordinator error taxonomy and its HTTP mapping
//! - [`config`]: configuration parsing utilities

pub mod config;
pub mod error;
pub mod messages;
