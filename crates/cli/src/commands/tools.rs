//! `taskforge tools`: list the registered tools.

use taskforge_config::AppConfig;
use taskforge_core::tool::ToolRegistry;

pub fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = taskforge_tools::default_registry(config)?;
    for line in describe(&registry) {
        println!("{line}");
    }
    Ok(())
}

/// One line per tool: name, category, and whether calls need confirmation.
fn describe(registry: &ToolRegistry) -> Vec<String> {
    registry
        .names()
        .into_iter()
        .filter_map(|name| registry.get(name).ok())
        .map(|tool| {
            let flag = if tool.requires_confirmation() {
                "dangerous, confirms"
            } else {
                "safe"
            };
            format!(
                "{:<8} {:<12} {:<20} {}",
                tool.name(),
                format!("{:?}", tool.category()),
                flag,
                tool.description()
            )
        })
        .collect()
}
