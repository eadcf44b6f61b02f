//! Barkeep Service Library Crate
//!
//! Environment configuration, prompt loading and the terminal collaborators
//! for the tavern conversation. The `barkeep` binary is a thin wrapper
//! around this library.

pub mod config;
pub mod console;
pub mod prompts;
