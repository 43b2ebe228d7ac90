//! # Epoch Trainer
//!
//! Resumable epoch-based training runs: each epoch trains, evaluates and
//! writes a checkpoint; restarting the run picks up from the newest one.
//! Ships a small MLP regressor built on the Burn ML framework as the
//! model being trained.
//!
//! ## Modules
//!
//! - [`checkpoint`] — Checkpoint naming, discovery, atomic save and retention
//! - [`schedule`] — Step learning-rate schedule
//! - [`training`] — Epoch driver, model contract, per-epoch statistics
//! - [`model`] — Reference regressor, CSV data pipeline, backend selection
//! - [`config`] — TOML configuration loading and validation
//! - [`error`] — Structured error types

#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod model;
pub mod schedule;
pub mod training;
