use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use s3sis::config;
use s3sis::sync::engine::{DownloadOptions, SyncEngine};
use s3sis::sync::remote::RemoteStore;
use s3sis_store::StoreClient;
use tracing_subscriber::EnvFilter;

/// Content-addressed workspace synchronization against an S3-compatible
/// object store.
#[derive(Debug, Parser)]
#[command(name = "s3sis", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish the local workspace under a label
    Upload(UploadArgs),
    /// Materialize a published label into the local workspace
    Download(DownloadArgs),
    /// Inspect, rebuild, or validate the local manifest
    Manifest(ManifestArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Label to publish or fetch
    #[arg(short, long)]
    label: String,

    /// Profile to use from the config file
    #[arg(short, long, default_value = config::DEFAULT_PROFILE)]
    profile: String,

    /// Workspace root (defaults to the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct UploadArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Apply the published access/modify timestamps to unchanged files
    #[arg(long)]
    preserve_timestamp: bool,

    /// Apply the published permission bits to unchanged files
    #[arg(long)]
    preserve_attributes: bool,

    /// Create directories that exist only in the published manifest
    #[arg(long)]
    preserve_empty_folders: bool,

    /// Keep local changes: don't re-download files whose content changed
    #[arg(long)]
    no_overwrite: bool,

    /// Delete local files that the published manifest doesn't track
    #[arg(long)]
    cleanup: bool,
}

#[derive(Debug, Args)]
struct ManifestArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Rebuild the manifest from the workspace and persist it
    #[arg(long)]
    regenerate: bool,

    /// Rescan the workspace and fail if it drifts from the manifest
    #[arg(long, conflicts_with = "regenerate")]
    local_validate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match Cli::parse().command {
        Command::Upload(args) => {
            let engine = build_engine(&args.common)?;
            let report = engine.upload(&args.common.label).await?;
            println!(
                "uploaded {} objects ({} already stored), {} entries tracked",
                report.objects_uploaded, report.objects_skipped, report.files_scanned
            );
        }
        Command::Download(args) => {
            let engine = build_engine(&args.common)?;
            let options = DownloadOptions {
                no_overwrite: args.no_overwrite,
                preserve_timestamp: args.preserve_timestamp,
                preserve_attributes: args.preserve_attributes,
                preserve_empty_folders: args.preserve_empty_folders,
                cleanup: args.cleanup,
            };
            let report = engine.download(&args.common.label, options).await?;
            println!(
                "downloaded {} files, created {} folders, deleted {} entries",
                report.files_downloaded, report.folders_created, report.entries_deleted
            );
        }
        Command::Manifest(args) => {
            let engine = build_engine(&args.common)?;
            if args.regenerate {
                let summary = engine.regenerate_manifest(&args.common.label).await?;
                println!(
                    "manifest regenerated: {} files, {} directories",
                    summary.files, summary.directories
                );
            } else if args.local_validate {
                let report = engine.validate_manifest(&args.common.label).await?;
                if !report.is_clean() {
                    anyhow::bail!(
                        "workspace drifts from the manifest: {} added, {} edited, {} deleted",
                        report.added,
                        report.edited,
                        report.deleted
                    );
                }
                println!("manifest matches the workspace");
            } else {
                let summary = engine.manifest_summary(&args.common.label).await?;
                println!(
                    "label {}: {} files, {} directories",
                    args.common.label, summary.files, summary.directories
                );
            }
        }
    }

    Ok(())
}

fn build_engine(common: &CommonArgs) -> anyhow::Result<SyncEngine> {
    let profile = config::load_profile(&common.profile)
        .with_context(|| format!("failed to load profile `{}`", common.profile))?;
    let workspace = match &common.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let client = match &profile.endpoint {
        Some(endpoint) => StoreClient::with_base_url(endpoint, profile.access_token.clone()),
        None => {
            StoreClient::for_bucket(&profile.bucket, &profile.region, profile.access_token.clone())
        }
    }
    .context("invalid store endpoint")?;
    let store = RemoteStore::new(client, &profile.project, profile.thread_pool_size);
    Ok(SyncEngine::new(
        store,
        workspace,
        &profile.project,
        profile.thread_pool_size,
    ))
}
