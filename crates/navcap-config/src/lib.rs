//! Configuration parsing for blender-navcap
//!
//! This crate handles parsing the KDL configuration file that selects the
//! physical keyboard and mouse, names the virtual output devices and tunes
//! the remap timing.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{load_config, parse_config, parse_config_str};
