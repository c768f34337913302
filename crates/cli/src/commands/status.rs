//! `mentor status` — Show system status.

use mentor_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("Mentor Status");
    println!("=============");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Provider:     {}", config.provider.kind);
    println!("  Model:        {}", config.provider.model);
    println!("  Temperature:  {}", config.provider.temperature);
    println!("  Storage:      {}", config.storage.backend);
    println!("  Database:     {}", config.database_path().display());
    println!(
        "  Gateway:      {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!(
        "  History:      {} turns",
        config.orchestrator.history_window
    );
    println!(
        "  Tool timeout: {}s",
        config.orchestrator.tool_timeout_secs
    );
    println!(
        "  API key:      {}",
        if config.has_api_key() {
            "configured"
        } else {
            "missing"
        }
    );

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file — run `mentor init` first");
    }

    Ok(())
}
