//! Registry-backed tool installer: turns individually-versioned tool
//! artifacts, packaged as the first filesystem layer of an OCI image, into
//! files installed on the host, with dependency resolution, pluggable
//! artifact caching, safe path-rewritten extraction and reversible
//! manifest-tracked state.

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod conflict;
pub mod error;
pub mod install;
pub mod resolver;
pub mod rewrite;
pub mod shell;
pub mod state;
pub mod status;
pub mod types;
