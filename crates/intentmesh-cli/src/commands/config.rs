//! Config command - print the effective settings

use intentmesh_state::Settings;

pub fn show(settings: &Settings) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}
