//! Configuration commands

use std::path::Path;

use anyhow::{Context, Result};
use mailytics::{Config, ConfigError};

/// Load the config named on the command line, or the user config.
///
/// A named file must load. A broken user config falls back to defaults and
/// the reason is returned for logging.
pub fn load_config(path: Option<&Path>) -> Result<(Config, Option<ConfigError>)> {
  match path {
    Some(path) => {
      let config = Config::load(path).with_context(|| format!("Failed to load config {}", path.display()))?;
      Ok((config, None))
    }
    None => Ok(Config::try_load_default()),
  }
}

/// Print the default template, or the effective configuration
pub fn cmd_config(config: &Config, effective: bool) -> Result<()> {
  let rendered = if effective {
    config.generate_template()
  } else {
    Config::default().generate_template()
  }
  .context("Failed to render config")?;

  println!("{}", rendered);
  Ok(())
}
