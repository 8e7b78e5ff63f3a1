use crate::cache::BackendKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Release builds (a git tag at HEAD) report the bare tag; dev builds carry
/// the crate version plus commit and branch from build.rs.
fn get_version() -> &'static str {
    if let Some(tag) = option_env!("TOOLPAK_GIT_TAG") {
        return tag;
    }
    let version = format!(
        "v{}-{} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("TOOLPAK_GIT_COMMIT").unwrap_or("unknown"),
        option_env!("TOOLPAK_GIT_BRANCH").unwrap_or("unknown"),
    );
    // Runs once at startup; leaking satisfies clap's &'static str contract.
    Box::leak(version.into_boxed_str())
}

#[derive(Parser)]
#[command(name = "toolpak")]
#[command(about = "A registry-backed tool installer for OCI-packaged artifacts")]
#[command(version = get_version(), propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce output to errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Install per-user instead of system-wide
    #[arg(long, global = true)]
    pub user: bool,

    /// Nest all filesystem writes under this prefix
    #[arg(long, global = true)]
    pub prefix: Option<PathBuf>,

    /// Artifact cache backend
    #[arg(long, global = true, value_enum, default_value_t = BackendKind::File)]
    pub cache: BackendKind,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install tools and their runtime dependencies
    Install {
        /// Tools to install (e.g. 'jq')
        tools: Vec<String>,
        /// Install every tool carrying one of these tags
        #[arg(long)]
        tags: Vec<String>,
        /// Reinstall the tools already recorded as installed
        #[arg(long)]
        installed: bool,
        /// Install every tool in the catalog
        #[arg(long)]
        all: bool,
        /// Read requested tool names from a file, one per line
        #[arg(long)]
        from_file: Option<PathBuf>,
        /// Print the annotated plan without touching the filesystem
        #[arg(long)]
        plan: bool,
        /// Like --plan, but fail if anything is missing or outdated
        #[arg(long)]
        check: bool,
        /// Reinstall even when the installed version matches
        #[arg(long)]
        reinstall: bool,
        /// Do not probe or install dependency-only tools
        #[arg(long)]
        skip_deps: bool,
        /// Skip conflicting tools instead of aborting
        #[arg(long)]
        skip_conflicts: bool,
    },

    /// Remove an installed tool
    Uninstall {
        /// Tool to remove
        tool: String,
        /// Clean up state even when nothing records the tool as installed
        #[arg(short, long)]
        force: bool,
    },

    /// List catalog tools
    List {
        /// Only tools recorded as installed
        #[arg(long)]
        installed: bool,
    },

    /// Search the catalog
    Search {
        /// Substring or regular expression
        term: String,
        /// Match tool names
        #[arg(long)]
        name: bool,
        /// Match tags
        #[arg(long)]
        tags: bool,
        /// Match dependency names
        #[arg(long)]
        deps: bool,
    },

    /// Show one tool's catalog entry
    Describe {
        /// Tool to describe
        tool: String,
        /// Output format (json, yaml)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Probe and report installation status
    Status {
        /// Tools to probe (all catalog tools when omitted)
        tools: Vec<String>,
    },

    /// Maintain the local artifact cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show the current version
    Version,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Remove cached artifacts older than the retention window
    Prune {
        /// Retention window in days
        #[arg(long, default_value_t = 90)]
        max_age_days: i64,
    },
}
