//! synthlift entry point: upload photos as a new synth collection.

mod config;
mod display;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use synthlift_transfer::{Credentials, HttpTransport};
use synthlift_uploader::{
    CollectionUpload, License, MediaApi, PrivacyLevel, RestMediaApi, Topology, UploadError,
    UploadOutcome, Uploader, default_builder,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::{ACCESS_TOKEN_ENV, CliConfig};

/// Exit status for requests rejected before any upload started.
const USAGE_EXIT_CODE: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "synthlift", version, about = "Upload photos as a new synth collection")]
struct Args {
    /// Photos to upload, in capture order.
    #[arg(required = true)]
    photos: Vec<PathBuf>,

    /// Collection title.
    #[arg(short, long)]
    title: String,

    #[arg(short, long, default_value = "")]
    description: String,

    /// Tag to attach; repeat for more.
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Keep the collection out of search results.
    #[arg(long)]
    unlisted: bool,

    #[arg(long, value_enum, default_value_t = TopologyArg::Unknown)]
    topology: TopologyArg,

    /// Parallel upload lanes (overrides config).
    #[arg(short = 'p', long)]
    parallelism: Option<usize>,

    /// Automatic resume passes after failures (overrides config).
    #[arg(long)]
    resume_attempts: Option<u32>,

    /// Media service base URL (overrides config).
    #[arg(long)]
    service_url: Option<String>,

    /// Config file to use instead of the default location.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective settings back to the config file.
    #[arg(long)]
    save_config: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum TopologyArg {
    Unknown,
    Spin,
    Panorama,
    Wall,
    Walk,
}

impl From<TopologyArg> for Topology {
    fn from(t: TopologyArg) -> Self {
        match t {
            TopologyArg::Unknown => Topology::Unknown,
            TopologyArg::Spin => Topology::Spin,
            TopologyArg::Panorama => Topology::Panorama,
            TopologyArg::Wall => Topology::Wall,
            TopologyArg::Walk => Topology::Walk,
        }
    }
}

impl Args {
    /// Layers flag overrides on top of the loaded config.
    fn apply_to(&self, config: &mut CliConfig) {
        if let Some(url) = &self.service_url {
            config.service_url = url.clone();
        }
        if let Some(n) = self.parallelism {
            config.parallelism = n;
        }
        if let Some(n) = self.resume_attempts {
            config.resume_attempts = n;
        }
    }

    fn collection(&self) -> CollectionUpload {
        CollectionUpload {
            title: self.title.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            privacy_level: if self.unlisted {
                PrivacyLevel::Unlisted
            } else {
                PrivacyLevel::Public
            },
            license: License::default(),
            topology: self.topology.into(),
            captured_date: chrono::Utc::now(),
            photo_paths: self.photos.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "upload failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };
    let mut config = CliConfig::load(&config_path)?;
    args.apply_to(&mut config);
    if args.save_config {
        config.save(&config_path)?;
        tracing::info!(path = %config_path.display(), "configuration saved");
    }
    config.apply_token_override(std::env::var(ACCESS_TOKEN_ENV).ok());

    if config.service_url.is_empty() {
        bail!("no service URL configured (use --service-url or the config file)");
    }
    if config.access_token.is_empty() {
        bail!("no access token configured (set {ACCESS_TOKEN_ENV} or the config file)");
    }

    let credentials = Credentials::new(
        &config.service_url,
        &config.access_token,
        Some(&config.api_version),
    );
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let api = RestMediaApi::with_builder(default_builder().timeout(timeout), credentials.clone())
        .context("building metadata client")?;
    let transport = HttpTransport::new(&credentials)
        .context("building upload client")?
        .with_idle_timeout(timeout);
    let uploader = Uploader::new(Arc::new(transport));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, finishing in-flight uploads");
                cancel.cancel();
            }
        });
    }

    let renderer = tokio::spawn(display::render(uploader.subscribe()));

    tracing::info!(
        photos = args.photos.len(),
        parallelism = config.parallelism,
        "starting upload"
    );
    let result = upload_with_resume(&uploader, &api, &args, &config, &cancel).await;

    let state = uploader.state();
    drop(uploader);
    if let Err(e) = renderer.await {
        tracing::warn!(error = %e, "progress display task failed");
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_usage() => {
            eprintln!("error: {e}");
            return Ok(ExitCode::from(USAGE_EXIT_CODE));
        }
        Err(e) => return Err(e.into()),
    };

    match outcome {
        UploadOutcome::Succeeded { .. } => {
            if let Some(id) = state.collection_id {
                println!("{}", credentials.view_link(id));
            }
            Ok(ExitCode::SUCCESS)
        }
        UploadOutcome::Failed { failed, total } => {
            for chunk in &state.failed_chunks {
                eprintln!("failed: {}", chunk.source_path.display());
            }
            tracing::error!(failed, total, "upload incomplete");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Uploads the collection, then resumes failures up to the configured limit.
async fn upload_with_resume(
    uploader: &Uploader,
    api: &dyn MediaApi,
    args: &Args,
    config: &CliConfig,
    cancel: &CancellationToken,
) -> Result<UploadOutcome, UploadError> {
    let mut outcome = uploader
        .upload_collection(api, &args.collection(), cancel.clone(), config.parallelism)
        .await?;

    let mut attempt = 0;
    while !outcome.is_success() && attempt < config.resume_attempts && !cancel.is_cancelled() {
        attempt += 1;
        tracing::info!(attempt, "resuming failed uploads");
        outcome = uploader.resume(cancel.clone(), config.parallelism).await?;
    }
    Ok(outcome)
}
