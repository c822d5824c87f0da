//! CLI subcommands.

pub mod common;
pub mod config;
pub mod exists;
pub mod get;
pub mod md5;
