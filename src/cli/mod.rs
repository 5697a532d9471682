//! Command-line interface for usermedia.
//!
//! Provides commands for ingesting images, checking asset status,
//! resolving signed URLs, regenerating variants and deleting assets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{self, ResolvedConfig};
use crate::core::{MediaService, UploadRequest, VariantUrl};
use crate::domain::{AssetId, AssetStatus, ImageFormat};

/// usermedia - Profile image derivative pipeline
#[derive(Parser, Debug)]
#[command(name = "usermedia")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest an image and wait for its variants
    Ingest {
        /// Image file to upload
        file: PathBuf,

        /// Owner user id
        #[arg(short, long)]
        owner: String,

        /// Declared MIME type (guessed from the extension if omitted)
        #[arg(short, long)]
        mime: Option<String>,

        /// Seconds to wait before returning the current status
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show the status of an asset
    Status {
        /// Asset ID
        asset_id: String,
    },

    /// Resolve a signed URL for one variant
    Url {
        /// Asset ID
        asset_id: String,

        /// Variant name (e.g. thumb-64)
        variant: String,
    },

    /// Resolve signed URLs for every variant
    Urls {
        /// Asset ID
        asset_id: String,
    },

    /// Produce a new revision of one variant
    Regenerate {
        /// Asset ID
        asset_id: String,

        /// Variant name
        variant: String,
    },

    /// Delete an asset, its records and stored objects
    Delete {
        /// Asset ID
        asset_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::load_config()?;

        if let Commands::Config = self.command {
            return show_config(&cfg);
        }

        let service = MediaService::open(&cfg)?;
        let result = self.dispatch(&service, &cfg).await;
        service.shutdown().await;
        result
    }

    async fn dispatch(&self, service: &MediaService, cfg: &ResolvedConfig) -> Result<()> {
        match &self.command {
            Commands::Ingest {
                file,
                owner,
                mime,
                timeout,
            } => {
                let timeout = timeout.map(Duration::from_secs).unwrap_or(cfg.submit_timeout);
                ingest(service, file, owner, mime.as_deref(), timeout, self.json).await
            }
            Commands::Status { asset_id } => show_status(service, asset_id, self.json).await,
            Commands::Url { asset_id, variant } => {
                let url = service
                    .orchestrator()
                    .variant_url(&AssetId::parse(asset_id.as_str()), variant)
                    .await?;
                print_urls(&[url], self.json)
            }
            Commands::Urls { asset_id } => {
                let urls = service
                    .orchestrator()
                    .asset_urls(&AssetId::parse(asset_id.as_str()))
                    .await?;
                print_urls(&urls, self.json)
            }
            Commands::Regenerate { asset_id, variant } => {
                let derivative = service
                    .orchestrator()
                    .regenerate(&AssetId::parse(asset_id.as_str()), variant)
                    .await?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&derivative)?);
                } else {
                    println!(
                        "Regenerated {} (revision {}): {}",
                        derivative.variant, derivative.revision, derivative.storage_key
                    );
                }
                Ok(())
            }
            Commands::Delete { asset_id } => {
                service
                    .orchestrator()
                    .delete(&AssetId::parse(asset_id.as_str()))
                    .await?;
                eprintln!("Deleted asset {}", asset_id);
                Ok(())
            }
            Commands::Config => show_config(cfg),
        }
    }
}

/// Guess a MIME type from the file extension
fn guess_mime(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(ImageFormat::from_extension)
        .map(|format| format.mime_type())
}

/// Upload a file and print the outcome
async fn ingest(
    service: &MediaService,
    file: &Path,
    owner: &str,
    mime: Option<&str>,
    timeout: Duration,
    json: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read image: {}", file.display()))?;

    let mime = mime
        .or_else(|| guess_mime(file))
        .unwrap_or_default()
        .to_string();

    let mut request = UploadRequest::new(owner, bytes, mime);
    if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
        request = request.with_file_name(name);
    }

    let outcome = service.gateway().ingest_with_timeout(request, timeout).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.asset_id);
        match outcome.status {
            AssetStatus::Ready => eprintln!("[Asset ready]"),
            AssetStatus::Failed => eprintln!(
                "[Asset failed: {}]",
                outcome.last_error.as_deref().unwrap_or("unknown error")
            ),
            status if outcome.timed_out => {
                eprintln!("[Still {} after {}s, processing continues]", status, timeout.as_secs())
            }
            status => eprintln!("[Asset {}]", status),
        }
    }

    if outcome.status == AssetStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Show the status of an asset
async fn show_status(service: &MediaService, asset_id: &str, json: bool) -> Result<()> {
    let asset = service
        .orchestrator()
        .status(&AssetId::parse(asset_id))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&asset)?);
        return Ok(());
    }

    println!("Asset ID: {}", asset.id);
    println!("Owner: {}", asset.owner_user_id);
    println!("Content hash: {}", asset.content_hash);
    println!("Status: {}", asset.status);
    println!("Created: {}", asset.created_at);
    println!("Updated: {}", asset.updated_at);
    if let Some(error) = &asset.last_error {
        println!("Last error: {}", error);
    }

    Ok(())
}

fn print_urls(urls: &[VariantUrl], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(urls)?);
        return Ok(());
    }

    for url in urls {
        println!("{:<12} {}", url.variant, url.url);
        println!("{:<12} expires {}", "", url.expires_at.to_rfc3339());
    }
    Ok(())
}

/// Show resolved configuration
fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("usermedia configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Objects:  {}", cfg.objects_dir.display());
    println!("  Database: {}", cfg.database_path().display());
    println!("  Outbox:   {}", cfg.outbox_dir().display());
    println!();
    println!("Limits:");
    println!("  Max upload:    {} bytes", cfg.limits.max_upload_bytes);
    println!("  Allowed MIME:  {}", cfg.limits.allowed_mime_types.join(", "));
    println!();
    println!("Variants:");
    for variant in &cfg.variants {
        let bound = variant
            .max_side
            .map(|side| format!("{}px", side))
            .unwrap_or_else(|| "original".to_string());
        println!("  {:<12} {:<9} {}", variant.name, bound, variant.format);
    }
    println!();
    println!("Retry: {} attempts, {}ms initial, {}ms max, x{}",
        cfg.retry.max_attempts,
        cfg.retry.initial_delay_ms,
        cfg.retry.max_delay_ms,
        cfg.retry.backoff_multiplier
    );
    println!("Cache TTL: {}s", cfg.cache_ttl.as_secs());
    println!("URLs: {} (ttl {}s)", cfg.urls.base_url, cfg.urls.ttl.as_secs());
    println!(
        "Publisher: {:?}, {} partitions{}",
        cfg.publisher.kind,
        cfg.publisher.partitions,
        cfg.publisher
            .webhook_url
            .as_ref()
            .map(|url| format!(" -> {}", url))
            .unwrap_or_default()
    );
    println!("Submit timeout: {}s", cfg.submit_timeout.as_secs());
    println!("JPEG quality: {}", cfg.jpeg_quality);

    Ok(())
}
