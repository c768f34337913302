//! `mentor init` — Initialize the config directory.

use mentor_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    std::fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        println!("  Config already exists: {}", config_path.display());
        println!("  Edit it directly, or delete it and run `mentor init` again.");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;

    println!("  Created {}", config_path.display());
    println!();
    println!("  Next steps:");
    println!("    1. Set your API key:  export DEEPSEEK_API_KEY=sk-...");
    println!("    2. Try it out:        mentor chat -m \"帮我创建一个复习计划\"");
    println!("    3. Or run the server: mentor serve");

    Ok(())
}
