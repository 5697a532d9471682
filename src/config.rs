//! Configuration for the media pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (USERMEDIA_HOME, USERMEDIA_SIGNING_SECRET)
//! 2. Config file (.usermedia/config.yaml)
//! 3. Defaults (~/.usermedia)
//!
//! Config file discovery:
//! - Searches current directory and parents for .usermedia/config.yaml
//! - Paths in config file are relative to the .usermedia/ directory

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::RetryPolicy;
use crate::domain::VariantSpec;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
    #[serde(default)]
    pub variants: Option<Vec<VariantSpec>>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub urls: Option<UrlConfig>,
    #[serde(default)]
    pub publisher: Option<PublisherConfig>,
    #[serde(default)]
    pub submit_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .usermedia/)
    pub home: Option<String>,
    /// Object store root (relative to .usermedia/)
    pub objects: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_upload_bytes: Option<u64>,
    pub allowed_mime_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlConfig {
    pub base_url: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub signing_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    pub kind: Option<PublisherKind>,
    pub partitions: Option<u32>,
    pub webhook_url: Option<String>,
    pub retry: Option<RetryPolicy>,
}

/// Which bus backend completion events go to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherKind {
    /// JSONL files under $USERMEDIA_HOME/outbox
    Outbox,
    /// HTTP POST to a webhook endpoint
    Webhook,
}

/// Upload validation limits
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_upload_bytes: u64,
    /// Lowercased glob patterns, e.g. "image/jpeg" or "image/*"
    pub allowed_mime_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024, // 10MB
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct UrlSettings {
    pub base_url: String,
    pub ttl: Duration,
    pub signing_secret: String,
}

impl Default for UrlSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000/media".to_string(),
            ttl: Duration::from_secs(900),
            signing_secret: "dev-only-secret".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub kind: PublisherKind,
    pub partitions: u32,
    pub webhook_url: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            kind: PublisherKind::Outbox,
            partitions: 8,
            webhook_url: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory (database, outbox)
    pub home: PathBuf,
    /// Object store root
    pub objects_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub limits: UploadLimits,
    pub variants: Vec<VariantSpec>,
    pub retry: RetryPolicy,
    pub cache_ttl: Duration,
    pub urls: UrlSettings,
    pub publisher: PublisherSettings,
    pub submit_timeout: Duration,
    /// Quality for JPEG-encoded variants (1-100)
    pub jpeg_quality: u8,
}

impl ResolvedConfig {
    /// Defaults rooted at the given home directory
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            objects_dir: home.join("objects"),
            home,
            config_file: None,
            limits: UploadLimits::default(),
            variants: VariantSpec::defaults(),
            retry: RetryPolicy::default(),
            cache_ttl: Duration::from_secs(300),
            urls: UrlSettings::default(),
            publisher: PublisherSettings::default(),
            submit_timeout: Duration::from_secs(30),
            jpeg_quality: 85,
        }
    }

    /// Path to the SQLite metadata database
    pub fn database_path(&self) -> PathBuf {
        self.home.join("media.db")
    }

    /// Directory holding the per-partition event outbox files
    pub fn outbox_dir(&self) -> PathBuf {
        self.home.join("outbox")
    }

    /// Look up a configured variant by name
    pub fn variant(&self, name: &str) -> Option<&VariantSpec> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.variants.is_empty() {
            anyhow::bail!("At least one variant must be configured");
        }

        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.name.trim().is_empty() {
                anyhow::bail!("Variant name cannot be empty");
            }
            if !seen.insert(variant.name.as_str()) {
                anyhow::bail!("Duplicate variant name: {}", variant.name);
            }
            if variant.max_side == Some(0) {
                anyhow::bail!("Variant '{}' has max_side 0", variant.name);
            }
        }

        if self.limits.allowed_mime_types.is_empty() {
            anyhow::bail!("Allowed MIME type list cannot be empty");
        }
        for pattern in &self.limits.allowed_mime_types {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid MIME pattern: {}", pattern))?;
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            anyhow::bail!("jpeg_quality must be between 1 and 100, got {}", self.jpeg_quality);
        }
        if self.retry.max_attempts == 0 || self.publisher.retry.max_attempts == 0 {
            anyhow::bail!("Retry max_attempts must be at least 1");
        }
        if self.publisher.partitions == 0 {
            anyhow::bail!("Publisher partitions must be at least 1");
        }
        if self.publisher.kind == PublisherKind::Webhook && self.publisher.webhook_url.is_none() {
            anyhow::bail!("Webhook publisher requires publisher.webhook_url");
        }
        if self.cache_ttl >= self.urls.ttl {
            tracing::warn!(
                cache_ttl_s = self.cache_ttl.as_secs(),
                url_ttl_s = self.urls.ttl.as_secs(),
                "Cache TTL is not shorter than signed URL TTL; cached URLs may be served expired"
            );
        }

        Ok(())
    }
}

/// Trim, lowercase and dedupe MIME patterns, dropping blanks
fn sanitize_mime_types(mime_types: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    mime_types
        .into_iter()
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .filter(|m| seen.insert(m.clone()))
        .collect()
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".usermedia").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file over the defaults
fn apply_config_file(config_path: &Path, file: ConfigFile, default_home: PathBuf) -> ResolvedConfig {
    let config_dir = config_path.parent().unwrap_or(Path::new("."));

    let home = match std::env::var("USERMEDIA_HOME") {
        Ok(env_home) => PathBuf::from(env_home),
        Err(_) => file
            .paths
            .home
            .as_deref()
            .map(|h| resolve_path(config_dir, h))
            .unwrap_or(default_home),
    };

    let mut resolved = ResolvedConfig::with_home(home);
    resolved.config_file = Some(config_path.to_path_buf());

    if let Some(objects) = file.paths.objects.as_deref() {
        resolved.objects_dir = resolve_path(config_dir, objects);
    }

    if let Some(limits) = file.limits {
        if let Some(max) = limits.max_upload_bytes {
            resolved.limits.max_upload_bytes = max;
        }
        if let Some(mime_types) = limits.allowed_mime_types {
            resolved.limits.allowed_mime_types = sanitize_mime_types(mime_types);
        }
    }

    if let Some(variants) = file.variants {
        resolved.variants = variants;
    }
    if let Some(retry) = file.retry {
        resolved.retry = retry;
    }
    if let Some(ttl) = file.cache.and_then(|c| c.ttl_seconds) {
        resolved.cache_ttl = Duration::from_secs(ttl);
    }

    if let Some(urls) = file.urls {
        if let Some(base_url) = urls.base_url {
            resolved.urls.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(ttl) = urls.ttl_seconds {
            resolved.urls.ttl = Duration::from_secs(ttl);
        }
        if let Some(secret) = urls.signing_secret {
            resolved.urls.signing_secret = secret;
        }
    }

    if let Some(publisher) = file.publisher {
        if let Some(kind) = publisher.kind {
            resolved.publisher.kind = kind;
        }
        if let Some(partitions) = publisher.partitions {
            resolved.publisher.partitions = partitions;
        }
        resolved.publisher.webhook_url = publisher.webhook_url;
        if let Some(retry) = publisher.retry {
            resolved.publisher.retry = retry;
        }
    }

    if let Some(timeout) = file.submit_timeout_seconds {
        resolved.submit_timeout = Duration::from_secs(timeout);
    }
    if let Some(quality) = file.jpeg_quality {
        resolved.jpeg_quality = quality;
    }

    resolved
}

/// Load configuration from all sources
pub fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".usermedia");

    let mut resolved = match find_config_file() {
        Some(config_path) => {
            let file = load_config_file(&config_path)?;
            apply_config_file(&config_path, file, default_home)
        }
        None => {
            let home = std::env::var("USERMEDIA_HOME")
                .map(PathBuf::from)
                .unwrap_or(default_home);
            ResolvedConfig::with_home(home)
        }
    };

    if let Ok(secret) = std::env::var("USERMEDIA_SIGNING_SECRET") {
        resolved.urls.signing_secret = secret;
    }

    resolved.validate()?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ImageFormat;
    use std::io::Write;
    use tempfile::TempDir;

    const SAMPLE_CONFIG: &str = r#"
version: "1.0"
paths:
  objects: ../objects
limits:
  max_upload_bytes: 2048
  allowed_mime_types: [" IMAGE/PNG ", "image/png", "image/*"]
variants:
  - name: thumb-32
    max_side: 32
    format: png
retry:
  max_attempts: 5
  initial_delay_ms: 10
cache:
  ttl_seconds: 60
urls:
  base_url: https://cdn.example.com/media/
  ttl_seconds: 600
publisher:
  kind: webhook
  partitions: 4
  webhook_url: https://hooks.example.com/media
submit_timeout_seconds: 5
jpeg_quality: 70
"#;

    fn write_config(temp: &TempDir) -> PathBuf {
        let dir = temp.path().join(".usermedia");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", SAMPLE_CONFIG).unwrap();
        path
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp);

        let file = load_config_file(&path).unwrap();
        assert_eq!(file.version, "1.0");
        assert_eq!(file.paths.objects, Some("../objects".to_string()));
        assert_eq!(file.retry.as_ref().unwrap().max_attempts, 5);
        assert_eq!(file.variants.as_ref().unwrap()[0].format, ImageFormat::Png);
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp);
        let file = load_config_file(&path).unwrap();

        let resolved = apply_config_file(&path, file, temp.path().join("home"));

        assert_eq!(resolved.limits.max_upload_bytes, 2048);
        assert_eq!(
            resolved.limits.allowed_mime_types,
            vec!["image/png".to_string(), "image/*".to_string()]
        );
        assert_eq!(resolved.variants.len(), 1);
        assert_eq!(resolved.retry.initial_delay_ms, 10);
        assert_eq!(resolved.cache_ttl, Duration::from_secs(60));
        assert_eq!(resolved.urls.base_url, "https://cdn.example.com/media");
        assert_eq!(resolved.publisher.kind, PublisherKind::Webhook);
        assert_eq!(resolved.publisher.partitions, 4);
        assert_eq!(resolved.submit_timeout, Duration::from_secs(5));
        assert_eq!(resolved.jpeg_quality, 70);
        assert!(resolved.validate().is_ok());
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ResolvedConfig::with_home(PathBuf::from("/tmp/usermedia"));
        assert!(config.validate().is_ok());
        assert_eq!(config.variants.len(), 3);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/usermedia/media.db"));
        assert!(config.cache_ttl < config.urls.ttl);
    }

    #[test]
    fn test_validation_rejects_duplicate_variants() {
        let mut config = ResolvedConfig::with_home(PathBuf::from("/tmp/usermedia"));
        config.variants.push(VariantSpec::defaults()[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_jpeg_quality() {
        let mut config = ResolvedConfig::with_home(PathBuf::from("/tmp/usermedia"));
        config.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_requires_webhook_url() {
        let mut config = ResolvedConfig::with_home(PathBuf::from("/tmp/usermedia"));
        config.publisher.kind = PublisherKind::Webhook;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project/.usermedia");

        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            resolve_path(&base, "../objects"),
            PathBuf::from("/home/user/project/.usermedia/../objects")
        );
    }
}
