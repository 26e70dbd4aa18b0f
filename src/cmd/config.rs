//! `sdlc config [show|init]` — layered configuration inspection.

use crate::config::{SdlcConfig, sdlc_dir};
use anyhow::Result;
use std::path::Path;

#[derive(Debug, Clone, clap::Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file + env overrides applied).
    Show,
    /// Write a default `sdlc.toml` to `.sdlc/`.
    Init,
}

pub fn cmd_config(project_dir: &Path, action: Option<ConfigAction>) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let config = SdlcConfig::load(project_dir)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init => {
            let path = SdlcConfig::write_default(project_dir)?;
            println!("wrote default configuration to {}", path.display());
            println!("(directory: {})", sdlc_dir(project_dir).display());
        }
    }
    Ok(())
}
