//! Shared test utilities for mesh-auth crates.
//!
//! This crate provides:
//! - Proptest generators for secrets, key ids and entity references
//! - Mock key-set endpoints on `wiremock`
//! - A test signing authority minting identity tokens

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::expect_used, clippy::missing_panics_doc)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use fixtures::*;
pub use generators::*;
