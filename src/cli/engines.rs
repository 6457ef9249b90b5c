//! Engine listing

use anyhow::Result;

use takopi::agent::{EngineRegistry, Runner};
use takopi::config::Config;

/// List registered engines with availability and the default marker
pub fn engines_command(config: &Config) -> Result<()> {
    let registry = EngineRegistry::from_config(config)?;

    println!("Engines ({}):\n", registry.ids().len());
    for runner in registry.runners() {
        let default = if runner.engine() == registry.default_engine() {
            " (default)"
        } else {
            ""
        };
        let status = if runner.is_available() {
            "available"
        } else {
            "not installed"
        };
        println!("  {}{} - {} [{}]", runner.engine(), default, runner.title(), status);
    }
    Ok(())
}
