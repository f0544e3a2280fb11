//! # scipion
//!
//! Command line front end over `scipion-core`.
//!
//! The binary in `main.rs` only sets up logging and configuration; the
//! commands live in [`cli`] so integration tests can drive them directly.

pub mod cli;
pub mod config;
