//! Shared wiring: config, stores, provider, analysis workers and the
//! orchestrator, built the same way for every command.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use carebridge_agent::Orchestrator;
use carebridge_analysis::{AnalysisPipeline, AnalysisService, WorkerPool};
use carebridge_config::AppConfig;
use carebridge_core::files::FileStore;
use carebridge_core::store::RecordStore;
use carebridge_store::{LocalFileStore, SqliteStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.context("Failed to load config")
}

pub struct Runtime {
    pub config: AppConfig,
    pub orchestrator: Orchestrator,
    shutdown: CancellationToken,
    workers: WorkerPool,
}

impl Runtime {
    /// Open storage, start the analysis workers and recover reports an
    /// earlier run left behind. Fails without an API key.
    pub async fn start(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let config = load_config(config_path)?;
        if !config.has_api_key() {
            print_missing_key_help();
            anyhow::bail!("No API key found. See above for setup instructions.");
        }
        Self::build(config, true).await
    }

    /// Like [`Runtime::start`] for commands that only read or edit records:
    /// no key is needed and pending reports stay queued for the next chat.
    pub async fn open(config_path: Option<&Path>) -> anyhow::Result<Self> {
        Self::build(load_config(config_path)?, false).await
    }

    async fn build(config: AppConfig, resume_pending: bool) -> anyhow::Result<Self> {
        if let Some(dir) = sqlite_parent_dir(&config.storage.database_url) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create database directory {}", dir.display()))?;
        }
        std::fs::create_dir_all(&config.storage.files_dir).with_context(|| {
            format!(
                "Failed to create files directory {}",
                config.storage.files_dir.display()
            )
        })?;

        let store: Arc<dyn RecordStore> = Arc::new(
            SqliteStore::new(&config.storage.database_url)
                .await
                .context("Failed to open the record store")?,
        );
        let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(&config.storage.files_dir));

        let router = carebridge_providers::router::build_from_config(&config);
        let provider = router
            .default()
            .context("No default provider configured")?;

        let pipeline = Arc::new(AnalysisPipeline::new(
            provider.clone(),
            store.clone(),
            files,
            &config.models,
            config.analysis.clone(),
        ));
        let shutdown = CancellationToken::new();
        let (analysis, workers) = AnalysisService::start(pipeline, shutdown.clone());
        if resume_pending {
            let requeued = analysis.requeue_pending().await?;
            if requeued > 0 {
                info!(requeued, "Resuming analysis of earlier uploads");
            }
        }

        let orchestrator = Orchestrator::new(store, provider, analysis, &config);
        debug!(provider = %config.provider, workers = workers.size(), "Runtime ready");

        Ok(Self {
            config,
            orchestrator,
            shutdown,
            workers,
        })
    }

    /// Token the interactive wait listens on.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Stop the workers. A job in hand finishes first; queued jobs stay
    /// PENDING and are picked up by the next run.
    pub async fn stop(self) {
        self.shutdown.cancel();
        drop(self.orchestrator);
        self.workers.join().await;
    }
}

/// Directory holding a file-backed SQLite database, if the URL names one.
fn sqlite_parent_dir(url: &str) -> Option<&Path> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Path::new(path).parent().filter(|p| !p.as_os_str().is_empty())
}

fn print_missing_key_help() {
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    CAREBRIDGE_API_KEY=sk-...   (takes priority)");
    eprintln!("    OPENAI_API_KEY=sk-...");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
}

/// Guess a MIME type from the file extension.
pub fn mime_from_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("txt" | "md") => "text/plain",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Read a file into an upload named after its file name.
pub async fn read_upload(path: &Path) -> anyhow::Result<carebridge_core::report::Upload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    Ok(carebridge_core::report::Upload::new(
        name,
        mime_from_path(path),
        bytes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_directory_from_url() {
        assert_eq!(
            sqlite_parent_dir("sqlite:///home/me/.carebridge/carebridge.db"),
            Some(Path::new("/home/me/.carebridge"))
        );
        assert_eq!(
            sqlite_parent_dir("sqlite://data/app.db?mode=rwc"),
            Some(Path::new("data"))
        );
        assert_eq!(sqlite_parent_dir("sqlite::memory:"), None);
        assert_eq!(sqlite_parent_dir("sqlite://app.db"), None);
        assert_eq!(sqlite_parent_dir("postgres://localhost/db"), None);
    }

    #[test]
    fn mime_types_by_extension() {
        assert_eq!(mime_from_path(Path::new("scan.PDF")), "application/pdf");
        assert_eq!(mime_from_path(Path::new("x-ray.jpeg")), "image/jpeg");
        assert_eq!(mime_from_path(Path::new("notes.txt")), "text/plain");
        assert_eq!(mime_from_path(Path::new("blob")), "application/octet-stream");
    }
}
