//! CLI commands

pub mod create;
pub mod run;
