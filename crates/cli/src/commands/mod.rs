//! CLI command implementations

mod config;
mod index;
mod path;

pub use config::{cmd_config, load_config};
pub use index::cmd_index;
pub use path::cmd_path;
