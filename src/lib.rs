//! Mender library crate
//!
//! Runs a test command, asks a model why it fails, and optionally turns the
//! model's tagged answer into reviewed edits of the working tree.

pub mod analysis;
pub mod config;
pub mod context;
pub mod display;
pub mod error;
pub mod llm;
pub mod patch;
pub mod prompts;
pub mod runner;
pub mod util;
