//! # nsprobe-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the nsprobe workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and carries no Linux-specific code, so the wire-level
//! crates and the CLI agree on one vocabulary.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
