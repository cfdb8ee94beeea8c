//! Configuration management.
//!
//! Sessions are described by an [`Options`] block (loadable from TOML for
//! the CLI, or populated key-by-key through [`Options::apply_variable`] by
//! an embedding host) which resolves into the typed [`Config`] the engine
//! consumes.

mod types;
mod validation;

pub use types::*;
pub use validation::{parse_device_spec, InstanceSpec, IFNAMSIZ, MAX_INTERFACES};

use crate::{Error, Result};
use std::path::Path;

/// Load an [`Options`] block from a TOML file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Options> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Config(e.to_string()))?;
    let options: Options = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(options)
}
