//! Packaging and run orchestration behind the commands.

pub mod builder;
pub mod config;
pub mod dockerfile;
pub mod error;
pub mod manifests;
pub mod models;
pub mod resources;
pub mod runner;
