//! `taskforge config`: show the effective configuration.

use taskforge_config::AppConfig;

pub fn run(config: &AppConfig) {
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    if !config.has_api_key() {
        println!("# No API key set (use TASKFORGE_API_KEY or OPENAI_API_KEY)");
    }
    println!("{}", config.to_redacted_toml());
}
