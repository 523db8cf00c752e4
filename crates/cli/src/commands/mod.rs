//! Subcommand implementations

pub mod build;
pub mod classify;
pub mod defaults;
