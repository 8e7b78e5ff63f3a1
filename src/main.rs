use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::Read;

use toolpak::archive;
use toolpak::cache::{self, file::FileCache, registry::RegistryClient};
use toolpak::catalog::Catalog;
use toolpak::cli::{CacheAction, Cli, Commands};
use toolpak::config::{self, Paths};
use toolpak::install::{is_up_to_date, InstallOptions, Installer};
use toolpak::shell::SystemShell;
use toolpak::state;
use toolpak::status::Prober;
use toolpak::types::{Tool, ToolIdentity};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    let paths = Paths::from_env(cli.user, cli.prefix.clone());

    if let Commands::Version = cli.command {
        println!("toolpak v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let catalog = ensure_catalog(&paths).await?;
    let shell = SystemShell;
    let backend = cache::create(cli.cache, &paths);
    let installer = Installer::new(&catalog, backend.as_ref(), &paths, &shell);

    match cli.command {
        Commands::Install {
            tools,
            tags,
            installed,
            all,
            from_file,
            plan,
            check,
            reinstall,
            skip_deps,
            skip_conflicts,
        } => {
            let requested =
                build_requested(&catalog, &paths, tools, tags, installed, all, from_file)?;
            if requested.is_empty() {
                return Err(anyhow!("Nothing to install; specify tools, --tags or --all"));
            }

            let opts = InstallOptions {
                plan_only: plan,
                check,
                reinstall,
                skip_deps,
                skip_conflicts,
            };
            let report = installer.install(&requested, opts).await?;

            if plan || check {
                // The annotated plan is rendered before a check failure is
                // raised, so failing runs still show what was examined.
                print_plan(&report.plan);
                if check && report.outdated > 0 {
                    return Err(toolpak::error::Error::CheckFailed(report.outdated).into());
                }
            } else {
                for (name, reason) in &report.skipped {
                    println!("Skipped {} ({})", name, reason);
                }
                for name in &report.installed {
                    println!("Installed {}", name);
                }
            }
        }

        Commands::Uninstall { tool, force } => {
            if installer.uninstall(&tool, force)? {
                println!("Uninstalled {}", tool);
            } else {
                println!("{} is not installed", tool);
            }
        }

        Commands::List { installed } => {
            for tool in &catalog.tools {
                if installed && !recorded_installed(&paths, tool) {
                    continue;
                }
                println!("{} {} [{}]", tool.name, tool.version, tool.tags.join(", "));
            }
        }

        Commands::Search {
            term,
            name,
            tags,
            deps,
        } => {
            // Without explicit flags, search names and tags.
            let (name, tags) = if !name && !tags && !deps {
                (true, true)
            } else {
                (name, tags)
            };
            let matches = catalog.find(&term, name, tags, deps)?;
            for tool in &matches.tools {
                println!("{} {} [{}]", tool.name, tool.version, tool.tags.join(", "));
            }
        }

        Commands::Describe { tool, format } => {
            let tool = catalog.get_by_name(&tool)?;
            match format.as_str() {
                "yaml" => print!("{}", serde_yaml::to_string(tool)?),
                _ => println!("{}", serde_json::to_string_pretty(tool)?),
            }
        }

        Commands::Status { tools } => {
            let mut subset = if tools.is_empty() {
                catalog.clone()
            } else {
                catalog.get_by_names(&tools)
            };
            let prober = Prober::new(&paths, &shell);
            for tool in &mut subset.tools {
                prober.probe(tool)?;
                print_status(tool);
            }
        }

        Commands::Cache { action } => match action {
            CacheAction::Prune { max_age_days } => {
                let removed = FileCache::new(&paths).prune(chrono::Duration::days(max_age_days))?;
                println!("Pruned {} cached artifact(s)", removed);
            }
        },

        Commands::Version => unreachable!("handled above"),
    }

    Ok(())
}

fn setup_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "warn"
    } else if cli.verbose == 1 {
        "info"
    } else {
        "debug"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}

/// Load the catalog document, fetching it from the registry boundary when
/// the local copy is absent.
async fn ensure_catalog(paths: &Paths) -> Result<Catalog> {
    if let Some(bytes) = config::load_metadata_document(paths)? {
        return Ok(Catalog::from_slice(&bytes)?);
    }

    tracing::info!("No local catalog document, fetching from registry...");
    let client = RegistryClient::new();
    let identity = ToolIdentity {
        registry: paths.registry.clone(),
        repository: paths.repository.clone(),
        name: "metadata".to_string(),
        version: "latest".to_string(),
    };
    let layer = client.fetch_first_layer(&identity).await?;

    let mut document: Option<Vec<u8>> = None;
    archive::process_entries(&layer[..], |entry| {
        let is_metadata = entry
            .path()
            .ok()
            .and_then(|p| p.file_name().map(|n| n == config::METADATA_FILE_NAME))
            .unwrap_or(false);
        if is_metadata && document.is_none() {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            document = Some(bytes);
        }
        Ok(())
    })?;

    let document =
        document.ok_or_else(|| anyhow!("Metadata artifact carries no catalog document"))?;
    config::save_metadata_document(paths, &document)?;
    Ok(Catalog::from_slice(&document)?)
}

fn build_requested(
    catalog: &Catalog,
    paths: &Paths,
    tools: Vec<String>,
    tags: Vec<String>,
    installed: bool,
    all: bool,
    from_file: Option<std::path::PathBuf>,
) -> Result<Vec<String>> {
    let mut requested = tools;

    if !tags.is_empty() {
        requested.extend(catalog.get_by_tags(&tags).tools.into_iter().map(|t| t.name));
    }
    if installed {
        requested.extend(
            catalog
                .tools
                .iter()
                .filter(|t| recorded_installed(paths, t))
                .map(|t| t.name.clone()),
        );
    }
    if all {
        requested.extend(catalog.tools.iter().map(|t| t.name.clone()));
    }
    if let Some(path) = from_file {
        let content = std::fs::read_to_string(&path)?;
        requested.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    let mut seen = std::collections::HashSet::new();
    requested.retain(|name| seen.insert(name.clone()));
    Ok(requested)
}

fn recorded_installed(paths: &Paths, tool: &Tool) -> bool {
    state::marker_exists(paths, tool)
        || state::manifest_path(paths, &tool.name).exists()
}

fn print_plan(plan: &[Tool]) {
    for tool in plan {
        let mut notes = Vec::new();
        if tool.status.is_requested {
            notes.push("requested");
        }
        if tool.status.is_dependency {
            notes.push("dependency");
        }
        if is_up_to_date(tool) {
            notes.push("up-to-date");
        } else if tool.status.binary_present {
            notes.push("outdated");
        } else {
            notes.push("missing");
        }
        if tool.status.skip_conflict {
            notes.push("skipped: conflict");
        }
        println!("{} {} ({})", tool.name, tool.version, notes.join(", "));
    }
}

fn print_status(tool: &Tool) {
    println!(
        "{} {}: binary={} marker={} installed_version={}",
        tool.name,
        tool.version,
        tool.status.binary_present,
        tool.status.marker_present,
        tool.status.installed_version.as_deref().unwrap_or("-")
    );
}
