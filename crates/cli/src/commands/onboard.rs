//! `carebridge onboard`: First-time setup.

use std::path::Path;

use carebridge_config::AppConfig;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let default_path = AppConfig::config_dir().join("config.toml");
    let config_path = config_path.unwrap_or(default_path.as_path());

    println!("CareBridge — First-Time Setup");
    println!("=============================\n");

    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("  Created config directory: {}", dir.display());
        } else {
            println!("  Config directory exists: {}", dir.display());
        }
    }

    if config_path.exists() {
        println!("\n  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(config_path, AppConfig::default_toml())?;
    println!("  Created config.toml at: {}", config_path.display());
    println!("\n  Next steps:");
    println!("   1. Set CAREBRIDGE_API_KEY or add api_key to {}", config_path.display());
    println!("   2. Run: carebridge chat --user <your id>");
    println!("   3. Attach a report with: /upload <path> <question>\n");
    Ok(())
}
