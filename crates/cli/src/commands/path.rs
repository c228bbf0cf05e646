//! Index path lookup

use anyhow::Result;
use mailytics::{Config, index_dir};

/// Print where the index for `owner`/`name` lives
pub fn cmd_path(config: &Config, owner: &str, name: &str) -> Result<()> {
  println!("{}", index_dir(&config.index.location, owner, name).display());
  Ok(())
}
