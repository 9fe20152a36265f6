//! # dsplink-cli
//!
//! Command-line host for a DSP target on a serial port: status, storage
//! browsing and transfer, memory inspection, patch loading and real-time
//! control.
//!
//! `--dry-run` runs every command against an in-memory simulated target.

pub mod commands;
