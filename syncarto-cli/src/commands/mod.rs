//! CLI subcommands.

pub mod common;
pub mod config;
pub mod info;
pub mod pipeline;
pub mod render;
