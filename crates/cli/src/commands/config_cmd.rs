//! `carebridge config`: Configuration helpers.

use std::path::{Path, PathBuf};

use carebridge_config::AppConfig;

use super::runtime::load_config;

fn resolved_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn validate(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("Validating {}...", resolved_path(config_path).display());

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e:#}");
            return Err(e);
        }
    };
    println!("   Config parsed successfully");

    if !config.has_api_key() {
        println!("   Warning: no API key set (CAREBRIDGE_API_KEY or OPENAI_API_KEY)");
    }

    println!();
    println!("   Provider:   {}", config.provider);
    println!("   Primary:    {}", config.models.primary);
    println!("   Fallback:   {}", config.models.fallback);
    println!("   Router:     {}", config.models.router);
    println!("   Responder:  {}", config.models.responder);
    println!("   Database:   {}", config.storage.database_url);
    println!("   Files:      {}", config.storage.files_dir.display());
    println!("   Workers:    {}", config.analysis.workers);
    println!(
        "   Polling:    {} x {}ms",
        config.polling.max_attempts, config.polling.interval_ms
    );
    Ok(())
}

pub fn show(config_path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if config.api_key.is_some() {
        config.api_key = Some("********".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    println!("{}", resolved_path(config_path).display());
}
