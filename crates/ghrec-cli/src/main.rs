use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ghrec_reconcile::fixture::{load_fixture_bundle, load_record};
use ghrec_reconcile::{Aggregates, ReconcileConfig, Reconciler};
use ghrec_remote::{GithubClient, GithubClientConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ghrec")]
#[command(about = "Reconcile stored repository records with GitHub")]
struct Cli {
    /// YAML file with the organization and funding policy; env vars are used otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile from a captured fixture bundle without touching the network.
    Reconcile {
        #[arg(long)]
        bundle: PathBuf,
        /// Previously stored record as JSON.
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// Fetch a repository from the GitHub API and reconcile it.
    Sync {
        owner: String,
        repo: String,
        #[arg(long)]
        record: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ghrec_reconcile=info,ghrec_remote=info,ghrec=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ReconcileConfig::from_yaml_file(path)?,
        None => ReconcileConfig::from_env(),
    };
    let reconciler = Reconciler::new(config);

    let record = match cli.command {
        Commands::Reconcile { bundle, record } => {
            let bundle = load_fixture_bundle(&bundle)?;
            info!(
                fixture_id = %bundle.fixture_id,
                source_url = %bundle.captured_from_url,
                fetched_at = %bundle.fetched_at,
                "reconciling fixture bundle"
            );
            let current = load_record(record.as_deref())?;
            let contents = bundle.contents();
            reconciler
                .reconcile(current, &bundle.repository, bundle.aggregates(), &contents)
                .await?
        }
        Commands::Sync {
            owner,
            repo,
            record,
        } => {
            let client = GithubClient::new(GithubClientConfig::from_env())?;
            let remote = client
                .repository(&owner, &repo)
                .await
                .with_context(|| format!("fetching {owner}/{repo}"))?;
            let languages = client
                .languages(&owner, &repo)
                .await
                .with_context(|| format!("fetching languages of {owner}/{repo}"))?;
            let handle = client.repo(&owner, &repo);
            let commits = handle.commits();
            let contributors = handle.contributors();

            let current = load_record(record.as_deref())?;
            let aggregates = Aggregates {
                commits: Some(&commits),
                contributors: Some(&contributors),
                languages: Some(languages),
                organization: remote.organization.clone(),
                owner: remote.owner.clone(),
            };
            reconciler
                .reconcile(current, &remote, aggregates, &handle)
                .await?
        }
    };

    info!(repository = %record, compliant = record.is_funding_policy_compliant, "reconciled");
    println!(
        "{}",
        serde_json::to_string_pretty(&record).context("serializing record")?
    );

    Ok(())
}
