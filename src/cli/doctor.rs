//! Setup checks

use anyhow::Result;

use takopi::agent::{EngineRegistry, Runner};
use takopi::config::Config;

/// Print setup issues per engine. Returns `true` when nothing needs fixing.
pub fn doctor_command(config: &Config, engine: Option<&str>) -> Result<bool> {
    let registry = EngineRegistry::from_config(config)?;
    let cwd = std::env::current_dir()?.display().to_string();

    let runners = match engine {
        Some(id) => vec![registry.resolve(id)?],
        None => registry.runners().cloned().collect(),
    };

    let mut healthy = true;
    for runner in runners {
        let issues = runner.check_setup();
        if issues.is_empty() {
            println!("{}\n", runner.startup_message(&cwd));
            continue;
        }
        healthy = false;
        println!("{}: {} issue(s)", runner.engine(), issues.len());
        for issue in issues {
            println!("  - {}", issue.title);
            for line in &issue.lines {
                println!("  {}", line);
            }
        }
        println!();
    }
    Ok(healthy)
}
