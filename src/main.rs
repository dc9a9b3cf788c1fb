mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Instant;

use config::LauncherConfig;
use patchsync::{util, Error, HttpTransport, MemoryStore, PatchEngine, RejectionList, Server};

#[derive(Parser)]
#[command(name = "patchsync", about = "Patch manifest fetcher and client resource synchronizer")]
struct Cli {
    /// Path to the launcher config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log engine activity at debug level
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a server (or every server) for an available patch
    Check {
        /// Server ID
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        server: Option<String>,
        /// Check every configured server concurrently
        #[arg(long)]
        all: bool,
        /// Version to check (defaults to the server's current version)
        #[arg(long)]
        version: Option<String>,
        /// Expand every dependency's dependencies
        #[arg(long)]
        recursive: bool,
    },
    /// Download a patch and its dependencies, then apply its updates
    Update {
        #[arg(long)]
        server: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        recursive: bool,
    },
    /// Move staged files of a downloaded patch into the client directory
    Transfer {
        #[arg(long)]
        server: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Never offer a version for a server again
    Reject {
        #[arg(long)]
        server: String,
        #[arg(long)]
        version: String,
    },
    /// List the staged files of a version
    Staged {
        #[arg(long)]
        server: String,
        #[arg(long)]
        version: String,
    },
    /// Inspect or restore the client's original resources
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List captured originals and added files
    List,
    /// Write every captured original back and remove every added file
    Restore,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "patchsync=debug" } else { "patchsync=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn open_engine(
    config: &LauncherConfig,
    recursive: bool,
) -> Result<PatchEngine<HttpTransport, patchsync::SqliteStore>> {
    let engine = PatchEngine::open(
        HttpTransport::new()?,
        &config.cache_path,
        &config.rejections_path,
        &config.client_dir,
    )
    .with_context(|| format!("Failed to open resource cache: {}", config.cache_path.display()))?;
    Ok(engine.recursive(recursive))
}

fn version_or_remote<T: patchsync::Transport, S: patchsync::Store>(
    engine: &PatchEngine<T, S>,
    server: &Server,
    version: Option<String>,
) -> Result<String> {
    match version {
        Some(version) => Ok(version),
        None => engine
            .remote_version(server)
            .with_context(|| format!("Failed to query current version of {}", server.id)),
    }
}

fn check(
    config: &LauncherConfig,
    servers: &[Server],
    version: Option<String>,
    recursive: bool,
) -> Result<()> {
    let transport = HttpTransport::new()?;
    let rejections = RejectionList::load(&config.rejections_path)?;

    // Each server stages into its own directory, so checks run side by side.
    // Checking never touches the resource cache.
    let reports: Vec<String> = servers
        .par_iter()
        .map(|server| {
            let engine = PatchEngine::new(
                &transport,
                MemoryStore::new(),
                rejections.clone(),
                &config.client_dir,
            )
            .recursive(recursive);
            let outcome = version_or_remote(&engine, server, version.clone()).and_then(|version| {
                let Some(patch) = engine.check_update(server, &version)? else {
                    return Ok(format!("{version} rejected, skipped"));
                };
                let deps = engine.resolver().dependencies(server, &patch)?;
                Ok(format!(
                    "{version} available: {} downloads, {} replacements, {} additions, {} dependencies",
                    patch.manifest.download.len(),
                    patch.manifest.replace.len(),
                    patch.manifest.add.len(),
                    deps.len()
                ))
            });
            match outcome {
                Ok(line) => format!("  {}: {line}", server.id),
                Err(err) => format!("  {}: {err:#}", server.id),
            }
        })
        .collect();

    for line in reports {
        println!("{line}");
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => LauncherConfig::default_path()
            .context("No config directory on this platform; pass --config")?,
    };
    let mut config = LauncherConfig::load(&config_path)?;
    let start = Instant::now();

    match cli.command {
        Commands::Check {
            server,
            all,
            version,
            recursive,
        } => {
            println!("Checking for patches...");
            let servers = if all {
                config.servers.clone()
            } else {
                match server {
                    Some(id) => vec![config.server(&id)?.clone()],
                    None => bail!("Pass --server or --all"),
                }
            };
            check(&config, &servers, version, recursive)?;
        }
        Commands::Update {
            server,
            version,
            recursive,
        } => {
            let engine = open_engine(&config, recursive)?;
            let target = config.server_mut(&server)?;
            let version = version_or_remote(&engine, target, version)?;

            println!("Updating...");
            println!("  Server: {}", target.id);
            println!("  Version: {version}");

            let summary = match engine.update_resources(target, &version) {
                Err(Error::Rejected { .. }) => {
                    println!("\n{version} was rejected for {server}, skipped");
                    return Ok(());
                }
                result => result?,
            };
            config.save(&config_path)?;

            println!("\nPatch downloaded successfully!");
            println!("  Dependencies: {}", summary.dependencies.join(", "));
            println!("  Files downloaded: {}", summary.files_downloaded);
            println!("  Boot configuration updated: {}", summary.boot_updated);
            println!("  Protocol updated: {}", summary.protocol_updated);
        }
        Commands::Transfer {
            server,
            version,
            recursive,
        } => {
            let engine = open_engine(&config, recursive)?;
            let target = config.server(&server)?;

            println!("Transferring...");
            println!("  Server: {}", target.id);
            println!("  Version: {version}");
            println!("  Client: {}", config.client_dir.display());

            let summary = match engine.transfer_resources(target, &version) {
                Err(Error::Rejected { .. }) => {
                    println!("\n{version} was rejected for {server}, skipped");
                    return Ok(());
                }
                result => result?,
            };

            println!("\nResources transferred successfully!");
            println!("  Files replaced: {}", summary.files_replaced);
            println!("  Files added: {}", summary.files_added);
            println!("  Originals captured: {}", summary.originals_captured);
        }
        Commands::Reject { server, version } => {
            let mut engine = open_engine(&config, false)?;
            config.server(&server)?;
            engine.reject(&server, &version)?;
            println!("Rejected {version} for {server}");
        }
        Commands::Staged { server, version } => {
            patchsync::version::validate(&version)?;
            let dir = config.server(&server)?.staging_dir(&version);
            let files = util::staged_files(&dir)?;
            println!("Staged files in {}:", dir.display());
            for file in &files {
                println!("  {} ({} bytes)", file.relative_path, file.size);
            }
            println!("  Total: {}", files.len());
        }
        Commands::Cache { action } => {
            let engine = open_engine(&config, false)?;
            match action {
                CacheAction::List => {
                    println!("Replaced originals:");
                    for original in engine.cache().replaced().list()? {
                        println!("  {} ({} bytes)", original.path, original.content.len());
                    }
                    println!("Added files:");
                    for path in engine.cache().added().list()? {
                        println!("  {path}");
                    }
                }
                CacheAction::Restore => {
                    let summary = engine.restore_originals()?;
                    println!("\nClient restored successfully!");
                    println!("  Files restored: {}", summary.files_restored);
                    println!("  Files removed: {}", summary.files_removed);
                }
            }
        }
    }

    println!("  Time elapsed: {:.3}s", start.elapsed().as_secs_f64());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // The engine blocks on network and disk I/O; keep it off the async workers.
    tokio::task::spawn_blocking(move || run(cli)).await?
}
