//! burrow CLI - a minimal single-host container runtime.

pub mod commands;
pub mod output;
