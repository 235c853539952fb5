//! Config commands

use std::path::Path;

use anyhow::{Context, Result, bail};
use exposer::config::Config;
use tracing::info;

/// Show the effective configuration
pub fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
  let path = Config::resolve_path(config_path)?;
  let config = Config::load(&path)?;

  println!("Using config: {}", path.display());
  println!();
  println!("{}", render(&config)?);

  Ok(())
}

/// Write the default config file
pub fn cmd_config_init(output: Option<&Path>, force: bool) -> Result<()> {
  let path = match output {
    Some(path) => path.to_path_buf(),
    None => Config::user_config_path().context("Could not determine config directory")?,
  };

  write_template(&path, force)?;
  info!(path = %path.display(), "Wrote config template");

  println!("Created config: {}", path.display());
  println!();
  println!("Set store.url and credentials, or export EXPOSER_STORE_URL and");
  println!("EXPOSER_STORE_PASSWORD, before running 'exposer monitor'.");

  Ok(())
}

/// Effective config as TOML, password masked
fn render(config: &Config) -> Result<String> {
  toml::to_string_pretty(&config.redacted()).context("Failed to serialize config")
}

fn write_template(path: &Path, force: bool) -> Result<()> {
  if path.exists() && !force {
    bail!("Config file already exists: {} (use --force to overwrite)", path.display());
  }

  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
  }

  std::fs::write(path, Config::template()).with_context(|| format!("Failed to write {}", path.display()))?;
  Ok(())
}
